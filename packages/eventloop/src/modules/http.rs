//! Inbound HTTP server module.
//!
//! Transport is axum. Every request on a registered path becomes an
//! [`HttpRequestEvent`]; the connection task waits while the handler runs on
//! the consumer loop and then answers with whatever the handler wrote into
//! its [`HttpResponseWriter`].
//!
//! ```text
//! client ─► axum fallback ─► routes[path]? ──no──► 404
//!                                 │ yes
//!                                 ▼
//!                queue.push(HttpRequestEvent) ──► consumer: handler(&mut w, &req)
//!                                 │                              │
//!                       reply.await ◄────────── oneshot(w) ◄─────┘
//!                                 ▼
//!                          response (503 if the event was dropped)
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EventLoopError, Result};
use crate::event::Event;
use crate::module::Module;
use crate::modules::server::{serve, BoundAddr, RouteTable};
use crate::queue::EventQueue;

const NAME: &str = "http";

/// Request bodies larger than this are rejected with 413.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Handler signature for HTTP routes.
pub type HttpHandler = Arc<dyn Fn(&mut HttpResponseWriter, &HttpRequest) + Send + Sync>;

// =============================================================================
// Request / Response
// =============================================================================

/// A fully buffered inbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Body decoded as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Buffered response a handler writes into.
///
/// Starts as `200 OK` with no headers and an empty body.
#[derive(Debug)]
pub struct HttpResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Default for HttpResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponseWriter {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Set a header. Invalid names or values are ignored with a warning.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(header = name, "ignoring invalid response header"),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Append raw bytes to the body.
    pub fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    /// Append text to the body.
    pub fn write_str(&mut self, text: &str) {
        self.body.extend_from_slice(text.as_bytes());
    }

    /// Replace the body with `value` as JSON and set the content type.
    pub fn json<T: Serialize>(&mut self, value: &T) -> serde_json::Result<()> {
        self.body = serde_json::to_vec(value)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl IntoResponse for HttpResponseWriter {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

// =============================================================================
// Event
// =============================================================================

/// An inbound request waiting for its handler.
pub(crate) struct HttpRequestEvent {
    handler: HttpHandler,
    request: HttpRequest,
    reply: oneshot::Sender<HttpResponseWriter>,
}

impl Event for HttpRequestEvent {
    fn execute(self: Box<Self>) {
        let HttpRequestEvent {
            handler,
            request,
            reply,
        } = *self;
        let mut writer = HttpResponseWriter::new();
        handler(&mut writer, &request);
        // The client may have gone away; nothing to do then.
        let _ = reply.send(writer);
    }

    fn kind(&self) -> &'static str {
        "http.request"
    }
}

// =============================================================================
// Module
// =============================================================================

/// HTTP server whose route handlers run on the consumer loop.
pub struct HttpServerModule {
    queue: EventQueue,
    addr: Option<SocketAddr>,
    routes: RouteTable<HttpHandler>,
    bound: BoundAddr,
    started: AtomicBool,
}

impl HttpServerModule {
    /// Create the module. With no address the module accepts registrations
    /// but never listens.
    pub fn new(queue: EventQueue, addr: Option<SocketAddr>) -> Self {
        Self {
            queue,
            addr,
            routes: RouteTable::new(),
            bound: BoundAddr::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Route every request on `path` (any method) to `handler`.
    pub fn make_api_handler<F>(&self, path: &str, handler: F) -> Result<()>
    where
        F: Fn(&mut HttpResponseWriter, &HttpRequest) + Send + Sync + 'static,
    {
        self.routes.insert(path, Arc::new(handler))?;
        debug!(path, "http route registered");
        Ok(())
    }

    /// Registered paths, sorted.
    pub fn routes(&self) -> Vec<String> {
        self.routes.paths()
    }

    /// Address the server is listening on, once bound.
    ///
    /// Returns `None` immediately when no listen address is configured.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.addr?;
        self.bound.wait().await
    }

    fn router(self: &Arc<Self>) -> Router {
        Router::new().fallback(handle).with_state(self.clone())
    }
}

async fn handle(State(module): State<Arc<HttpServerModule>>, request: Request) -> Response {
    let Some(handler) = module.routes.get(request.uri().path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };
    let request = HttpRequest::new(parts.method, parts.uri, parts.headers, body);

    let (reply, response) = oneshot::channel();
    let event = HttpRequestEvent {
        handler,
        request,
        reply,
    };
    if module.queue.push(event).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match response.await {
        Ok(writer) => writer.into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[async_trait]
impl Module for HttpServerModule {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn exec(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EventLoopError::AlreadyRunning);
        }
        let Some(addr) = self.addr else {
            info!("http module has no listen address, not serving");
            return Ok(());
        };

        let router = self.router();
        serve(NAME, addr, router, &self.bound, shutdown).await?;
        info!("http module stopped");
        Ok(())
    }
}

impl std::fmt::Debug for HttpServerModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServerModule")
            .field("addr", &self.addr)
            .field("routes", &self.routes.paths())
            .finish_non_exhaustive()
    }
}
