//! The five event-producing modules.

pub mod api_call;
pub mod http;
pub mod task;
pub mod timer;
pub mod websocket;

mod server;

pub use api_call::{ApiCallError, ApiCallModule, ApiCallTask};
pub use http::{HttpHandler, HttpRequest, HttpResponseWriter, HttpServerModule};
pub use task::{TaskHandle, TaskModule, TaskSpec};
pub use timer::{TimerKind, TimerModule, TimerTask};
pub use websocket::{CloseEvent, MessageEvent, Session, WebsocketModule};
