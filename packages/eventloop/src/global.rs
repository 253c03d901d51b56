//! Process-wide app instance.
//!
//! Most programs want exactly one event loop. These free functions keep it in
//! a `OnceLock` so callbacks anywhere in the process can register more work
//! without threading an `&App` through every closure.
//!
//! ```ignore
//! eventloop::init_app(AppConfig::from_env()?)?;
//! eventloop::make_timer_task(Duration::from_secs(5), |_| {
//!     eventloop::make_task(TaskSpec::no_result(flush, || {})).ok();
//! })?;
//! eventloop::exec_app().await?;
//! ```

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use tracing::debug;

use crate::app::App;
use crate::config::AppConfig;
use crate::error::{EventLoopError, Result};
use crate::modules::{
    ApiCallError, ApiCallTask, CloseEvent, HttpRequest, HttpResponseWriter, MessageEvent, Session,
    TaskHandle, TaskSpec, TimerTask,
};

static APP: OnceLock<App> = OnceLock::new();
static CREATING: Mutex<()> = Mutex::new(());

/// Initialize the global app. The first successful call wins; later calls are
/// ignored.
pub fn init_app(config: AppConfig) -> Result<()> {
    new_app(config).map(|_| ())
}

/// Initialize the global app, returning it only to the call that created it.
pub fn new_app(config: AppConfig) -> Result<Option<&'static App>> {
    create_once(&APP, &CREATING, config)
}

/// Construct the app into `slot` unless one is already there.
///
/// Creation runs under `creating`, so concurrent first calls build exactly
/// one `App`.
fn create_once<'a>(
    slot: &'a OnceLock<App>,
    creating: &Mutex<()>,
    config: AppConfig,
) -> Result<Option<&'a App>> {
    let _guard = creating.lock().unwrap_or_else(|e| e.into_inner());
    if slot.get().is_some() {
        debug!("event loop already initialized, ignoring config");
        return Ok(None);
    }

    let app = App::new(config)?;
    Ok(Some(slot.get_or_init(|| app)))
}

/// The global app, if initialized.
pub fn app() -> Result<&'static App> {
    APP.get().ok_or(EventLoopError::NotInitialized)
}

/// Run the global app until its shutdown token is cancelled.
pub async fn exec_app() -> Result<()> {
    app()?.run().await
}

pub fn make_call_task<S, E>(
    url: &str,
    timeout: Duration,
    on_success: S,
    on_error: E,
) -> Result<ApiCallTask>
where
    S: FnOnce(String) + Send + 'static,
    E: FnOnce(ApiCallError) + Send + 'static,
{
    app()?.make_call_task(url, timeout, on_success, on_error)
}

pub fn make_timer_task<F>(interval: Duration, callback: F) -> Result<TimerTask>
where
    F: FnMut(u64) + Send + 'static,
{
    app()?.make_timer_task(interval, callback)
}

pub fn make_one_time_task<F>(delay: Duration, callback: F) -> Result<TimerTask>
where
    F: FnOnce(u64) + Send + 'static,
{
    app()?.make_one_time_task(delay, callback)
}

pub fn remove_timer_task(task: &TimerTask) -> Result<bool> {
    Ok(app()?.remove_timer_task(task))
}

pub fn make_api_handler<F>(path: &str, handler: F) -> Result<()>
where
    F: Fn(&mut HttpResponseWriter, &HttpRequest) + Send + Sync + 'static,
{
    app()?.make_api_handler(path, handler)
}

pub fn make_ws_handler<O, M, C>(path: &str, on_open: O, on_message: M, on_close: C) -> Result<()>
where
    O: Fn(&Session) + Send + Sync + 'static,
    M: Fn(&MessageEvent, &Session) + Send + Sync + 'static,
    C: Fn(&CloseEvent, &Session) -> anyhow::Result<()> + Send + Sync + 'static,
{
    app()?.make_ws_handler(path, on_open, on_message, on_close)
}

pub fn make_task<T, E>(spec: TaskSpec<T, E>) -> Result<TaskHandle>
where
    T: Send + 'static,
    E: Send + 'static,
{
    app()?.make_task(spec)
}
