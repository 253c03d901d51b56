//! Integration tests for the websocket module over real connections.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use eventloop::{CloseEvent, MessageEvent, Session};
use futures::{SinkExt, Stream, StreamExt};
use test_context::test_context;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::common::{wait_until, TestApp};

type Log = Arc<Mutex<Vec<String>>>;

fn register_echo(ctx: &TestApp, path: &str, log: &Log) {
    let opened = log.clone();
    let received = log.clone();
    let closed = log.clone();
    ctx.app
        .make_ws_handler(
            path,
            move |session: &Session| {
                opened.lock().unwrap().push("open".to_string());
                session.send_text("welcome").unwrap();
            },
            move |message: &MessageEvent, session: &Session| {
                received.lock().unwrap().push(format!("message {:?}", message.as_text()));
                match message.as_text() {
                    Some("quit") => session.close(4000, "requested").unwrap(),
                    Some(text) => session.send_text(text.to_uppercase()).unwrap(),
                    None => session.send_binary(message.as_bytes().to_vec()).unwrap(),
                }
            },
            move |close: &CloseEvent, _: &Session| {
                closed
                    .lock()
                    .unwrap()
                    .push(format!("close {} {}", close.code(), close.reason()));
                Ok(())
            },
        )
        .unwrap();
}

async fn next_message<S>(stream: &mut S) -> Message
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("no message in time")
        .expect("stream ended")
        .expect("read failed")
}

#[test_context(TestApp)]
#[tokio::test]
async fn session_callbacks_run_in_wire_order(ctx: &TestApp) {
    let log: Log = Arc::default();
    register_echo(ctx, "/chat", &log);

    let (mut ws, _) = connect_async(ctx.ws_url("/chat")).await.unwrap();
    assert_eq!(next_message(&mut ws).await, Message::Text("welcome".into()));

    ws.send(Message::Text("hi".into())).await.unwrap();
    assert_eq!(next_message(&mut ws).await, Message::Text("HI".into()));

    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    assert_eq!(next_message(&mut ws).await, Message::Binary(vec![1, 2, 3]));

    ws.close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "bye".into(),
    }))
    .await
    .unwrap();

    assert!(wait_until(5, || log.lock().unwrap().len() == 4).await);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "open".to_string(),
            "message Some(\"hi\")".to_string(),
            "message None".to_string(),
            "close 1000 bye".to_string(),
        ]
    );
    assert!(wait_until(5, || ctx.app.ws().active_sessions() == 0).await);
}

#[test_context(TestApp)]
#[tokio::test]
async fn server_can_close_session(ctx: &TestApp) {
    let log: Log = Arc::default();
    register_echo(ctx, "/chat", &log);

    let (mut ws, _) = connect_async(ctx.ws_url("/chat")).await.unwrap();
    next_message(&mut ws).await;

    ws.send(Message::Text("quit".into())).await.unwrap();
    match next_message(&mut ws).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4000);
            assert_eq!(frame.reason, "requested");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    // Reading again flushes the client's close reply.
    let _ = tokio::time::timeout(Duration::from_secs(5), ws.next()).await;

    assert!(wait_until(5, || {
        log.lock()
            .unwrap()
            .last()
            .is_some_and(|entry| entry.starts_with("close"))
    })
    .await);
}

#[test_context(TestApp)]
#[tokio::test]
async fn dropped_connection_still_reports_close(ctx: &TestApp) {
    let log: Log = Arc::default();
    register_echo(ctx, "/chat", &log);

    let (mut ws, _) = connect_async(ctx.ws_url("/chat")).await.unwrap();
    next_message(&mut ws).await;
    drop(ws);

    assert!(wait_until(5, || log.lock().unwrap().len() == 2).await);
    let log = log.lock().unwrap();
    assert!(log[1].starts_with("close 1006"), "{log:?}");
}

#[test_context(TestApp)]
#[tokio::test]
async fn unrouted_path_is_rejected(ctx: &TestApp) {
    let err = connect_async(ctx.ws_url("/nowhere")).await.unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status().as_u16(), 404),
        other => panic!("expected http error, got {other:?}"),
    }
}

#[test_context(TestApp)]
#[tokio::test]
async fn plain_http_request_is_bad_request(ctx: &TestApp) {
    let log: Log = Arc::default();
    register_echo(ctx, "/chat", &log);

    let url = format!("http://{}/chat", ctx.ws_addr);
    let response = reqwest::get(url).await.unwrap();
    assert_eq!(response.status().as_u16(), 400);
    assert!(log.lock().unwrap().is_empty());
}
