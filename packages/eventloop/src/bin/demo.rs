// Demo entry point: a heartbeat timer, an HTTP health route, a websocket
// echo route and a background task, all on one event loop.

use std::time::Duration;

use anyhow::{Context, Result};
use eventloop::{AppConfig, TaskSpec};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,eventloop=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = AppConfig::from_env().context("Failed to load configuration")?;
    if config.http_addr.is_none() {
        config.http_addr = Some("127.0.0.1:8080".parse()?);
    }
    if config.ws_addr.is_none() {
        config.ws_addr = Some("127.0.0.1:8081".parse()?);
    }
    tracing::info!(?config, "Configuration loaded");

    eventloop::init_app(config)?;

    eventloop::make_timer_task(Duration::from_secs(5), |n| {
        tracing::info!(beat = n, "heartbeat");
    })?;

    eventloop::make_one_time_task(Duration::from_secs(1), |_| {
        tracing::info!("warm-up finished");
    })?;

    eventloop::make_api_handler("/health", |w, _req| {
        w.set_header("content-type", "text/plain");
        w.write_str("ok");
    })?;

    eventloop::make_api_handler("/work", |w, _req| {
        // Offload to the pool; the reply does not wait for the result.
        let submitted = eventloop::make_task(TaskSpec::single_result(
            || (1..=20u64).product::<u64>(),
            |v| tracing::info!(result = v, "factorial done"),
        ));
        match submitted {
            Ok(handle) => w.write_str(&handle.id().to_string()),
            Err(e) => {
                w.set_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
                w.write_str(&e.to_string());
            }
        }
    })?;

    eventloop::make_ws_handler(
        "/echo",
        |session| tracing::info!(session = %session.id(), "client connected"),
        |message, session| {
            let sent = match message.as_text() {
                Some(text) => session.send_text(text),
                None => session.send_binary(message.as_bytes()),
            };
            if let Err(e) = sent {
                tracing::warn!(error = %e, "echo failed");
            }
        },
        |close, session| {
            tracing::info!(session = %session.id(), code = close.code(), "client left");
            Ok(())
        },
    )?;

    let app = eventloop::app()?;
    let shutdown = app.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down");
            shutdown.cancel();
        }
    });

    eventloop::exec_app().await?;
    Ok(())
}
