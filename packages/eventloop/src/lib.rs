//! # Eventloop
//!
//! A single-consumer event loop that turns timers, outbound HTTP calls,
//! inbound HTTP requests, websocket traffic and background tasks into one
//! ordered stream of callbacks.
//!
//! ## Core Concepts
//!
//! Every source of work is a **module**. Modules run their own I/O and, when
//! something happens, push an [`Event`] carrying the user's callback into a
//! bounded [`EventQueue`]. One consumer pops events in FIFO order and runs
//! them, so user callbacks never run concurrently with each other.
//!
//! ## Architecture
//!
//! ```text
//!  TimerModule ──────┐
//!  ApiCallModule ────┤
//!  HttpServerModule ─┼──► EventQueue (bounded, FIFO) ──► consumer loop
//!  WebsocketModule ──┤         ▲                            │
//!  TaskModule ───────┘         │                            ▼
//!                              │                      event.execute()
//!                              │                            │
//!                              └──── make_*() from callbacks┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One consumer** - callbacks run one at a time on the loop task
//! 2. **FIFO** - events execute in the order they were pushed
//! 3. **Backpressure** - a full queue makes producers wait instead of dropping
//! 4. **Exactly once** - each event executes at most once; each outbound call
//!    resolves to exactly one of its two callbacks
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use eventloop::{App, AppConfig, TaskSpec};
//!
//! #[tokio::main]
//! async fn main() -> eventloop::Result<()> {
//!     let app = App::new(AppConfig::new(256, 4))?;
//!
//!     app.make_timer_task(Duration::from_secs(1), |n| println!("tick {n}"))?;
//!     app.make_api_handler("/health", |w, _req| w.write_str("ok"))?;
//!     app.make_task(TaskSpec::single_result(|| 6 * 7, |v| println!("{v}")))?;
//!
//!     app.run().await
//! }
//! ```

// Core
mod app;
mod config;
mod error;
mod event;
mod global;
mod module;
mod queue;

// Event-producing modules
pub mod modules;

// Re-export core types
pub use app::App;
pub use config::AppConfig;
pub use error::{EventLoopError, Result};
pub use event::{from_fn, named, BoxedEvent, Event, FnEvent};
pub use module::Module;
pub use queue::{EventQueue, EventReceiver};

// Re-export module types
pub use modules::{
    ApiCallError, ApiCallModule, ApiCallTask, CloseEvent, HttpHandler, HttpRequest,
    HttpResponseWriter, HttpServerModule, MessageEvent, Session, TaskHandle, TaskModule, TaskSpec,
    TimerKind, TimerModule, TimerTask, WebsocketModule,
};

// Re-export the process-wide facade
pub use global::{
    app, exec_app, init_app, make_api_handler, make_call_task, make_one_time_task,
    make_task, make_timer_task, make_ws_handler, new_app, remove_timer_task,
};

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
