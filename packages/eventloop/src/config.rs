use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::error::EventLoopError;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_TASK_WORKERS: usize = 4;

/// Event loop configuration.
///
/// `queue_capacity` bounds the shared queue; producers wait once it is full.
/// The HTTP and websocket modules only listen when given an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub queue_capacity: usize,
    pub task_workers: usize,
    pub http_addr: Option<SocketAddr>,
    pub ws_addr: Option<SocketAddr>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, DEFAULT_TASK_WORKERS)
    }
}

impl AppConfig {
    pub fn new(queue_capacity: usize, task_workers: usize) -> Self {
        Self {
            queue_capacity,
            task_workers,
            http_addr: None,
            ws_addr: None,
        }
    }

    pub fn with_http_addr(mut self, addr: SocketAddr) -> Self {
        self.http_addr = Some(addr);
        self
    }

    pub fn with_ws_addr(mut self, addr: SocketAddr) -> Self {
        self.ws_addr = Some(addr);
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            queue_capacity: env::var("EVENTLOOP_QUEUE_CAPACITY")
                .unwrap_or_else(|_| DEFAULT_QUEUE_CAPACITY.to_string())
                .parse()
                .context("EVENTLOOP_QUEUE_CAPACITY must be a valid number")?,
            task_workers: env::var("EVENTLOOP_TASK_WORKERS")
                .unwrap_or_else(|_| DEFAULT_TASK_WORKERS.to_string())
                .parse()
                .context("EVENTLOOP_TASK_WORKERS must be a valid number")?,
            http_addr: optional_addr("EVENTLOOP_HTTP_ADDR")?,
            ws_addr: optional_addr("EVENTLOOP_WS_ADDR")?,
        })
    }

    pub fn validate(&self) -> std::result::Result<(), EventLoopError> {
        if self.queue_capacity == 0 {
            return Err(EventLoopError::ZeroCapacity);
        }
        if self.task_workers == 0 {
            return Err(EventLoopError::ZeroWorkers);
        }
        Ok(())
    }
}

fn optional_addr(key: &str) -> Result<Option<SocketAddr>> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key} must be a socket address like 127.0.0.1:8080")),
        _ => Ok(None),
    }
}
