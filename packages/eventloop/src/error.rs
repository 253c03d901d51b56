//! Structured error types for the event loop.
//!
//! `EventLoopError` covers the two synchronous failure classes:
//!
//! - **Registration validation** - a malformed interval, path or URL is
//!   rejected at the call site and never turns into a queued event.
//! - **Lifecycle violations** - using the global app before it exists, running
//!   an app twice, or pushing into a queue whose consumer is gone.
//!
//! Operation outcomes (a failed outbound call, a task error) are *not* errors
//! of this type. They travel through the queue like any other event and reach
//! the caller's error callback.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, EventLoopError>;

// =============================================================================
// Event Loop Error
// =============================================================================

/// Pattern-matchable errors for event loop operations.
#[derive(Debug, Error)]
pub enum EventLoopError {
    /// Queue capacity must be at least one slot.
    #[error("queue capacity must be greater than zero")]
    ZeroCapacity,

    /// The task pool needs at least one worker.
    #[error("task pool worker count must be greater than zero")]
    ZeroWorkers,

    /// A periodic timer was registered with a zero interval.
    #[error("timer interval must be greater than zero, got {interval:?}")]
    InvalidInterval {
        /// The rejected interval.
        interval: Duration,
    },

    /// An outbound call was registered with a zero timeout.
    #[error("call timeout must be greater than zero, got {timeout:?}")]
    InvalidTimeout {
        /// The rejected timeout.
        timeout: Duration,
    },

    /// An outbound call URL could not be parsed or is not http(s).
    #[error("invalid call url {url:?}: {reason}")]
    InvalidUrl {
        /// The URL as supplied by the caller.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A route path was empty or did not start with `/`.
    #[error("invalid route path {path:?}: must start with '/'")]
    InvalidPath {
        /// The rejected path.
        path: String,
    },

    /// A route is already registered for this path.
    #[error("route {path:?} is already registered")]
    RouteAlreadyRegistered {
        /// The duplicated path.
        path: String,
    },

    /// The process-wide app has not been initialized yet.
    #[error("event loop app is not initialized; call init_app first")]
    NotInitialized,

    /// `run` was called on an app whose consumer loop already started.
    #[error("event loop app is already running")]
    AlreadyRunning,

    /// The consumer side of the queue is gone.
    #[error("event queue is closed")]
    QueueClosed,

    /// A websocket session's connection has already closed.
    #[error("websocket session {session} is closed")]
    SessionClosed {
        /// Session id.
        session: uuid::Uuid,
    },

    /// A module failed while binding or serving.
    #[error("module {module} failed: {message}")]
    Module {
        /// Module name.
        module: &'static str,
        /// The underlying error message.
        message: String,
    },
}

impl EventLoopError {
    /// Returns true for errors raised while validating a registration.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EventLoopError::InvalidInterval { .. }
                | EventLoopError::InvalidTimeout { .. }
                | EventLoopError::InvalidUrl { .. }
                | EventLoopError::InvalidPath { .. }
                | EventLoopError::RouteAlreadyRegistered { .. }
        )
    }

    pub(crate) fn module(module: &'static str, err: impl std::fmt::Display) -> Self {
        EventLoopError::Module {
            module,
            message: err.to_string(),
        }
    }
}
