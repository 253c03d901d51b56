//! The app: shared queue, the five modules, and the consumer loop.
//!
//! # Lifecycle
//!
//! ```text
//! App::new(config)      Initialized: queue allocated, modules constructed
//!     │                 (registrations are accepted and buffered)
//!     ▼
//! app.run().await       Running: module workers spawned, then this task
//!                       becomes the consumer loop
//! ```
//!
//! `run` returns only when [`App::shutdown_token`] is cancelled. Cancelling
//! stops every module worker and ends the loop after the callback currently
//! executing; events still queued are dropped.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::{EventLoopError, Result};
use crate::module::Module;
use crate::modules::{
    ApiCallError, ApiCallModule, ApiCallTask, CloseEvent, HttpRequest, HttpResponseWriter,
    HttpServerModule, MessageEvent, Session, TaskHandle, TaskModule, TaskSpec, TimerModule,
    TimerTask, WebsocketModule,
};
use crate::queue::{EventQueue, EventReceiver};

/// Single-consumer event loop over the timer, API-call, HTTP, websocket and
/// task-pool modules.
///
/// # Example
///
/// ```ignore
/// let app = App::new(AppConfig::new(64, 4))?;
///
/// app.make_timer_task(Duration::from_secs(1), |n| println!("tick {n}"))?;
/// app.make_task(TaskSpec::single_result(expensive, |v| println!("{v}")))?;
///
/// app.run().await?;
/// ```
pub struct App {
    config: AppConfig,
    queue: EventQueue,
    receiver: Mutex<Option<EventReceiver>>,
    timer: Arc<TimerModule>,
    api: Arc<ApiCallModule>,
    http: Arc<HttpServerModule>,
    ws: Arc<WebsocketModule>,
    tasks: Arc<TaskModule>,
    shutdown: CancellationToken,
}

impl App {
    /// Allocate the queue and construct every module. Nothing runs yet.
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let (queue, receiver) = EventQueue::bounded(config.queue_capacity)?;

        let timer = Arc::new(TimerModule::new(queue.clone()));
        let api = Arc::new(ApiCallModule::new(queue.clone()));
        let http = Arc::new(HttpServerModule::new(queue.clone(), config.http_addr));
        let ws = Arc::new(WebsocketModule::new(queue.clone(), config.ws_addr));
        let tasks = Arc::new(TaskModule::new(queue.clone(), config.task_workers)?);

        info!(
            queue_capacity = config.queue_capacity,
            task_workers = config.task_workers,
            "event loop initialized"
        );

        Ok(Self {
            config,
            queue,
            receiver: Mutex::new(Some(receiver)),
            timer,
            api,
            http,
            ws,
            tasks,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Producer handle of the shared queue.
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Token that stops the app when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn timer(&self) -> &Arc<TimerModule> {
        &self.timer
    }

    pub fn api(&self) -> &Arc<ApiCallModule> {
        &self.api
    }

    pub fn http(&self) -> &Arc<HttpServerModule> {
        &self.http
    }

    pub fn ws(&self) -> &Arc<WebsocketModule> {
        &self.ws
    }

    pub fn tasks(&self) -> &Arc<TaskModule> {
        &self.tasks
    }

    // =========================================================================
    // Registration
    // =========================================================================

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
        self.api.make_call_task(url, timeout, on_success, on_error)
    }

    pub fn make_timer_task<F>(&self, interval: Duration, callback: F) -> Result<TimerTask>
    where
        F: FnMut(u64) + Send + 'static,
    {
        self.timer.make_timer_task(interval, callback)
    }

    pub fn make_one_time_task<F>(&self, delay: Duration, callback: F) -> Result<TimerTask>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.timer.make_one_time_task(delay, callback)
    }

    pub fn remove_timer_task(&self, task: &TimerTask) -> bool {
        self.timer.remove_timer_task(task)
    }

    pub fn make_api_handler<F>(&self, path: &str, handler: F) -> Result<()>
    where
        F: Fn(&mut HttpResponseWriter, &HttpRequest) + Send + Sync + 'static,
    {
        self.http.make_api_handler(path, handler)
    }

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
        self.ws.make_ws_handler(path, on_open, on_message, on_close)
    }

    pub fn make_task<T, E>(&self, spec: TaskSpec<T, E>) -> Result<TaskHandle>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        self.tasks.make_task(spec)
    }

    // =========================================================================
    // Run
    // =========================================================================

    /// Start every module, then run the consumer loop on this task.
    ///
    /// Fails with [`EventLoopError::AlreadyRunning`] if called twice.
    pub async fn run(&self) -> Result<()> {
        let receiver = self.take_receiver().ok_or(EventLoopError::AlreadyRunning)?;

        let mut workers = self.start_modules();
        info!("event loop running");

        let executed = receiver.run(self.shutdown.clone()).await;

        self.shutdown.cancel();
        while workers.join_next().await.is_some() {}
        info!(executed, "event loop stopped");
        Ok(())
    }

    fn take_receiver(&self) -> Option<EventReceiver> {
        self.receiver.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn modules(&self) -> [Arc<dyn Module>; 5] {
        [
            self.timer.clone(),
            self.api.clone(),
            self.http.clone(),
            self.ws.clone(),
            self.tasks.clone(),
        ]
    }

    fn start_modules(&self) -> JoinSet<()> {
        let mut workers = JoinSet::new();
        for module in self.modules() {
            let shutdown = self.shutdown.clone();
            workers.spawn(async move {
                let name = module.name();
                if let Err(e) = module.exec(shutdown).await {
                    error!(module = name, error = %e, "module stopped with error");
                }
            });
        }
        workers
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
