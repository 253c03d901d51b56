//! Websocket server module.
//!
//! Each registered path carries three callbacks. For every connection the
//! module pushes an open event, one message event per data frame, and a
//! final close event, all in wire order. Callbacks receive the connection's
//! [`Session`], which can send frames back or close the connection.
//!
//! ```text
//! upgrade ─► WsOpened ─► WsMessage* ─► WsClosed
//!              │            │            │
//!              └────────────┴─ queue ────┘
//!                                │
//!              consumer: on_open / on_message / on_close
//!                                │
//!                     session.send_*() ─► writer task ─► socket
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EventLoopError, Result};
use crate::event::Event;
use crate::module::Module;
use crate::modules::server::{serve, BoundAddr, RouteTable};
use crate::queue::EventQueue;

const NAME: &str = "websocket";

pub type OpenHandler = Arc<dyn Fn(&Session) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(&MessageEvent, &Session) + Send + Sync>;
pub type CloseHandler = Arc<dyn Fn(&CloseEvent, &Session) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
struct WsHandlers {
    on_open: OpenHandler,
    on_message: MessageHandler,
    on_close: CloseHandler,
}

// =============================================================================
// Session & Frames
// =============================================================================

/// One data frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    Text(String),
    Binary(Vec<u8>),
}

impl MessageEvent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageEvent::Text(text) => Some(text),
            MessageEvent::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MessageEvent::Text(text) => text.as_bytes(),
            MessageEvent::Binary(data) => data,
        }
    }
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    code: u16,
    reason: String,
}

impl CloseEvent {
    /// Server is shutting down.
    pub const GOING_AWAY: u16 = 1001;
    /// Client sent a close frame without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;

    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn from_frame(frame: Option<CloseFrame<'static>>) -> Self {
        match frame {
            Some(frame) => Self::new(frame.code, frame.reason),
            None => Self::new(Self::NO_STATUS, ""),
        }
    }
}

/// A live websocket connection as seen from callbacks.
///
/// Cheap to clone. Sends are queued to the connection's writer task and
/// never block the consumer loop.
#[derive(Clone)]
pub struct Session {
    id: Uuid,
    path: Arc<str>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Route path the connection was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::Binary(data.into()))
    }

    /// Send a close frame; the close event follows once the client answers.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<()> {
        let reason: String = reason.into();
        self.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
    }

    /// False once the connection's writer has stopped.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    fn send(&self, message: Message) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| EventLoopError::SessionClosed { session: self.id })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

// =============================================================================
// Events
// =============================================================================

struct WsOpened {
    session: Session,
    on_open: OpenHandler,
}

impl Event for WsOpened {
    fn execute(self: Box<Self>) {
        (self.on_open)(&self.session)
    }

    fn kind(&self) -> &'static str {
        "websocket.opened"
    }
}

struct WsMessage {
    message: MessageEvent,
    session: Session,
    on_message: MessageHandler,
}

impl Event for WsMessage {
    fn execute(self: Box<Self>) {
        (self.on_message)(&self.message, &self.session)
    }

    fn kind(&self) -> &'static str {
        "websocket.message"
    }
}

struct WsClosed {
    close: CloseEvent,
    session: Session,
    on_close: CloseHandler,
}

impl Event for WsClosed {
    fn execute(self: Box<Self>) {
        if let Err(e) = (self.on_close)(&self.close, &self.session) {
            warn!(
                session_id = %self.session.id,
                code = self.close.code,
                error = %e,
                "websocket close handler failed"
            );
        }
    }

    fn kind(&self) -> &'static str {
        "websocket.closed"
    }
}

// =============================================================================
// Module
// =============================================================================

/// Websocket server whose callbacks run on the consumer loop.
pub struct WebsocketModule {
    queue: EventQueue,
    addr: Option<SocketAddr>,
    routes: RouteTable<WsHandlers>,
    bound: BoundAddr,
    sessions: AtomicUsize,
    started: AtomicBool,
}

#[derive(Clone)]
struct UpgradeState {
    module: Arc<WebsocketModule>,
    shutdown: CancellationToken,
}

impl WebsocketModule {
    /// Create the module. With no address the module accepts registrations
    /// but never listens.
    pub fn new(queue: EventQueue, addr: Option<SocketAddr>) -> Self {
        Self {
            queue,
            addr,
            routes: RouteTable::new(),
            bound: BoundAddr::new(),
            sessions: AtomicUsize::new(0),
            started: AtomicBool::new(false),
        }
    }

    /// Accept websocket connections on `path`.
    pub fn make_ws_handler<O, M, C>(
        &self,
        path: &str,
        on_open: O,
        on_message: M,
        on_close: C,
    ) -> Result<()>
    where
        O: Fn(&Session) + Send + Sync + 'static,
        M: Fn(&MessageEvent, &Session) + Send + Sync + 'static,
        C: Fn(&CloseEvent, &Session) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.routes.insert(
            path,
            WsHandlers {
                on_open: Arc::new(on_open),
                on_message: Arc::new(on_message),
                on_close: Arc::new(on_close),
            },
        )?;
        debug!(path, "websocket route registered");
        Ok(())
    }

    /// Registered paths, sorted.
    pub fn routes(&self) -> Vec<String> {
        self.routes.paths()
    }

    /// Number of connections currently open.
    pub fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Address the server is listening on, once bound.
    ///
    /// Returns `None` immediately when no listen address is configured.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.addr?;
        self.bound.wait().await
    }

    async fn deliver<E: Event>(&self, session: &Session, event: E) -> bool {
        match self.queue.push(event).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "dropping websocket event");
                false
            }
        }
    }

    async fn serve_socket(
        self: Arc<Self>,
        socket: WebSocket,
        path: String,
        handlers: WsHandlers,
        shutdown: CancellationToken,
    ) {
        let (mut sink, mut stream) = socket.split();
        let (outbound, mut outbox) = mpsc::unbounded_channel::<Message>();
        let session = Session {
            id: Uuid::new_v4(),
            path: path.into(),
            outbound,
        };
        self.sessions.fetch_add(1, Ordering::SeqCst);
        debug!(session_id = %session.id, path = %session.path, "websocket session opened");

        let writer = tokio::spawn(async move {
            while let Some(message) = outbox.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
        });

        let opened = WsOpened {
            session: session.clone(),
            on_open: handlers.on_open.clone(),
        };
        let close = if !self.deliver(&session, opened).await {
            CloseEvent::new(CloseEvent::GOING_AWAY, "event loop stopped")
        } else {
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => {
                        break CloseEvent::new(CloseEvent::GOING_AWAY, "server shutting down");
                    }
                    next = stream.next() => next,
                };

                let message = match next {
                    Some(Ok(Message::Text(text))) => MessageEvent::Text(text),
                    Some(Ok(Message::Binary(data))) => MessageEvent::Binary(data),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(frame))) => break CloseEvent::from_frame(frame),
                    Some(Err(e)) => {
                        debug!(session_id = %session.id, error = %e, "websocket read error");
                        break CloseEvent::new(CloseEvent::ABNORMAL, e.to_string());
                    }
                    None => break CloseEvent::new(CloseEvent::ABNORMAL, ""),
                };

                let event = WsMessage {
                    message,
                    session: session.clone(),
                    on_message: handlers.on_message.clone(),
                };
                if !self.deliver(&session, event).await {
                    break CloseEvent::new(CloseEvent::GOING_AWAY, "event loop stopped");
                }
            }
        };

        debug!(session_id = %session.id, code = close.code, "websocket session closed");
        let closed = WsClosed {
            close,
            session: session.clone(),
            on_close: handlers.on_close,
        };
        self.deliver(&session, closed).await;
        writer.abort();
        self.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn upgrade(
    State(state): State<UpgradeState>,
    uri: Uri,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let path = uri.path().to_string();
    let Some(handlers) = state.module.routes.get(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(ws) = ws else {
        return (StatusCode::BAD_REQUEST, "expected websocket upgrade").into_response();
    };

    let UpgradeState { module, shutdown } = state;
    ws.on_upgrade(move |socket| module.serve_socket(socket, path, handlers, shutdown))
}

#[async_trait]
impl Module for WebsocketModule {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn exec(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EventLoopError::AlreadyRunning);
        }
        let Some(addr) = self.addr else {
            info!("websocket module has no listen address, not serving");
            return Ok(());
        };

        let router = Router::new().fallback(upgrade).with_state(UpgradeState {
            module: self.clone(),
            shutdown: shutdown.clone(),
        });
        serve(NAME, addr, router, &self.bound, shutdown).await?;
        info!("websocket module stopped");
        Ok(())
    }
}

impl std::fmt::Debug for WebsocketModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebsocketModule")
            .field("addr", &self.addr)
            .field("routes", &self.routes.paths())
            .field("sessions", &self.active_sessions())
            .finish_non_exhaustive()
    }
}
