//! Module trait shared by every event producer.
//!
//! A module owns its own workers and its own registration bookkeeping. It is
//! constructed with a handle to the shared [`EventQueue`](crate::EventQueue)
//! but must not produce anything until [`Module::exec`] is called, which the
//! app does only after every module exists.
//!
//! ```text
//! App::new()            App::run()
//!   ├─► TimerModule::new    ├─► spawn TimerModule::exec   ─┐
//!   ├─► ApiCallModule::new  ├─► spawn ApiCallModule::exec  │ push events
//!   ├─► HttpServer::new     ├─► spawn HttpServer::exec     ├──────────► queue
//!   ├─► Websocket::new      ├─► spawn Websocket::exec      │
//!   └─► TaskModule::new     ├─► spawn TaskModule::exec    ─┘
//!                           └─► consumer loop (this task)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// An independent subsystem that turns its own triggers into events.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Run the module's workers until `shutdown` is cancelled.
    ///
    /// Registrations made before this call are buffered and must be picked
    /// up here. Calling `exec` twice on the same module returns
    /// [`EventLoopError::AlreadyRunning`](crate::EventLoopError::AlreadyRunning).
    async fn exec(self: Arc<Self>, shutdown: CancellationToken) -> Result<()>;
}
