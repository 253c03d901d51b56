//! Outbound API-call module.
//!
//! `make_call_task` records a GET request together with a success and an
//! error callback. Once the module runs, every call executes concurrently on
//! its own task; its outcome is pushed back through the queue as either a
//! success or a failure event.
//!
//! # Exactly Once
//!
//! The two callbacks travel together as [`CallCallbacks`] and are split
//! only when the outcome is known. The outcome event owns exactly one of
//! them, so a call can never report both or neither (barring shutdown).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EventLoopError, Result};
use crate::event::{BoxedEvent, Event};
use crate::module::Module;
use crate::queue::EventQueue;

const NAME: &str = "api_call";

/// Why an outbound call did not succeed.
#[derive(Debug, Error)]
pub enum ApiCallError {
    /// No complete response within the call's timeout.
    #[error("call timed out after {timeout:?}")]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The server answered with a non-2xx status.
    #[error("unexpected status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// Connection, TLS or body-decoding failure.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
}

impl ApiCallError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ApiCallError::Timeout { timeout }
        } else {
            ApiCallError::Transport(err)
        }
    }
}

/// Handle to a registered outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCallTask {
    id: Uuid,
    url: Url,
    timeout: Duration,
}

impl ApiCallTask {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// The pair of outcome callbacks for one call.
pub(crate) struct CallCallbacks {
    on_success: Box<dyn FnOnce(String) + Send>,
    on_error: Box<dyn FnOnce(ApiCallError) + Send>,
}

impl CallCallbacks {
    /// Consume the pair into the single event for this outcome.
    fn into_event(self, outcome: std::result::Result<String, ApiCallError>) -> BoxedEvent {
        match outcome {
            Ok(body) => Box::new(CallSucceeded {
                body,
                on_success: self.on_success,
            }),
            Err(error) => Box::new(CallFailed {
                error,
                on_error: self.on_error,
            }),
        }
    }
}

struct CallSucceeded {
    body: String,
    on_success: Box<dyn FnOnce(String) + Send>,
}

impl Event for CallSucceeded {
    fn execute(self: Box<Self>) {
        (self.on_success)(self.body)
    }

    fn kind(&self) -> &'static str {
        "api_call.succeeded"
    }
}

struct CallFailed {
    error: ApiCallError,
    on_error: Box<dyn FnOnce(ApiCallError) + Send>,
}

impl Event for CallFailed {
    fn execute(self: Box<Self>) {
        (self.on_error)(self.error)
    }

    fn kind(&self) -> &'static str {
        "api_call.failed"
    }
}

struct PendingCall {
    task: ApiCallTask,
    callbacks: CallCallbacks,
}

/// Executes outbound HTTP GET calls and reports their outcomes.
pub struct ApiCallModule {
    queue: EventQueue,
    client: reqwest::Client,
    calls: mpsc::UnboundedSender<PendingCall>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<PendingCall>>>,
}

impl ApiCallModule {
    pub fn new(queue: EventQueue) -> Self {
        Self::with_client(queue, reqwest::Client::new())
    }

    /// Use a preconfigured HTTP client (proxies, default headers, TLS).
    pub fn with_client(queue: EventQueue, client: reqwest::Client) -> Self {
        let (calls, pending) = mpsc::unbounded_channel();
        Self {
            queue,
            client,
            calls,
            pending: Mutex::new(Some(pending)),
        }
    }

    /// Register a GET call to `url`.
    ///
    /// Exactly one of `on_success` (2xx body text) or `on_error` runs, once.
    pub fn make_call_task<S, E>(
        &self,
        url: &str,
        timeout: Duration,
        on_success: S,
        on_error: E,
    ) -> Result<ApiCallTask>
    where
        S: FnOnce(String) + Send + 'static,
        E: FnOnce(ApiCallError) + Send + 'static,
    {
        if timeout.is_zero() {
            return Err(EventLoopError::InvalidTimeout { timeout });
        }
        let parsed = parse_url(url)?;

        let task = ApiCallTask {
            id: Uuid::new_v4(),
            url: parsed,
            timeout,
        };
        let call = PendingCall {
            task: task.clone(),
            callbacks: CallCallbacks {
                on_success: Box::new(on_success),
                on_error: Box::new(on_error),
            },
        };

        self.calls
            .send(call)
            .map_err(|_| EventLoopError::module(NAME, "api call module stopped"))?;

        debug!(call_id = %task.id, url = %task.url, "call registered");
        Ok(task)
    }

    fn take_pending(&self) -> Option<mpsc::UnboundedReceiver<PendingCall>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    async fn fetch(&self, task: &ApiCallTask) -> std::result::Result<String, ApiCallError> {
        let response = self
            .client
            .get(task.url.clone())
            .timeout(task.timeout)
            .send()
            .await
            .map_err(|e| ApiCallError::from_reqwest(e, task.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiCallError::from_reqwest(e, task.timeout))?;

        if !status.is_success() {
            return Err(ApiCallError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn perform(self: Arc<Self>, call: PendingCall, shutdown: CancellationToken) {
        let PendingCall { task, callbacks } = call;

        let outcome = tokio::select! {
            _ = shutdown.cancelled() => return,
            outcome = self.fetch(&task) => outcome,
        };

        match &outcome {
            Ok(body) => debug!(call_id = %task.id, bytes = body.len(), "call succeeded"),
            Err(e) => debug!(call_id = %task.id, error = %e, "call failed"),
        }

        if let Err(e) = self.queue.push_boxed(callbacks.into_event(outcome)).await {
            warn!(call_id = %task.id, error = %e, "dropping call outcome");
        }
    }
}

fn parse_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| EventLoopError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(EventLoopError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

#[async_trait]
impl Module for ApiCallModule {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn exec(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut pending = self.take_pending().ok_or(EventLoopError::AlreadyRunning)?;
        info!("api call module started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = pending.recv() => match next {
                    Some(call) => {
                        tokio::spawn(self.clone().perform(call, shutdown.clone()));
                    }
                    None => break,
                },
            }
        }

        info!("api call module stopped");
        Ok(())
    }
}

impl std::fmt::Debug for ApiCallModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCallModule").finish_non_exhaustive()
    }
}
