//! Background task pool.
//!
//! Work closures run on blocking threads, at most `workers` at a time; their
//! completion callbacks run on the consumer loop like every other event.
//!
//! # Task Kinds
//!
//! A [`TaskSpec`] is one of three statically typed shapes, picked at
//! registration:
//!
//! | Kind            | Work                      | Callbacks                     |
//! |-----------------|---------------------------|-------------------------------|
//! | `no_result`     | `FnOnce()`                | `on_complete()`               |
//! | `single_result` | `FnOnce() -> T`           | `on_complete(T)`              |
//! | `fallible`      | `FnOnce() -> Result<T,E>` | `on_complete(T)`/`on_error(E)` |
//!
//! # Example
//!
//! ```ignore
//! app.make_task(TaskSpec::fallible(
//!     || std::fs::read_to_string("report.txt"),
//!     |text| println!("{} bytes", text.len()),
//!     |err| eprintln!("read failed: {err}"),
//! ))?;
//! ```

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{EventLoopError, Result};
use crate::event::{self, BoxedEvent};
use crate::module::Module;
use crate::queue::EventQueue;

const NAME: &str = "task_pool";

/// Type-erased job: runs the work and returns the completion event.
type Job = Box<dyn FnOnce() -> BoxedEvent + Send>;

/// A unit of background work plus its typed completion callbacks.
pub enum TaskSpec<T = (), E = Infallible> {
    NoResult {
        work: Box<dyn FnOnce() + Send>,
        on_complete: Box<dyn FnOnce() + Send>,
    },
    SingleResult {
        work: Box<dyn FnOnce() -> T + Send>,
        on_complete: Box<dyn FnOnce(T) + Send>,
    },
    Fallible {
        work: Box<dyn FnOnce() -> std::result::Result<T, E> + Send>,
        on_complete: Box<dyn FnOnce(T) + Send>,
        on_error: Box<dyn FnOnce(E) + Send>,
    },
}

impl TaskSpec<(), Infallible> {
    pub fn no_result<W, C>(work: W, on_complete: C) -> Self
    where
        W: FnOnce() + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        TaskSpec::NoResult {
            work: Box::new(work),
            on_complete: Box::new(on_complete),
        }
    }
}

impl<T> TaskSpec<T, Infallible> {
    pub fn single_result<W, C>(work: W, on_complete: C) -> Self
    where
        W: FnOnce() -> T + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        TaskSpec::SingleResult {
            work: Box::new(work),
            on_complete: Box::new(on_complete),
        }
    }
}

impl<T, E> TaskSpec<T, E> {
    pub fn fallible<W, C, F>(work: W, on_complete: C, on_error: F) -> Self
    where
        W: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        C: FnOnce(T) + Send + 'static,
        F: FnOnce(E) + Send + 'static,
    {
        TaskSpec::Fallible {
            work: Box::new(work),
            on_complete: Box::new(on_complete),
            on_error: Box::new(on_error),
        }
    }
}

impl<T: Send + 'static, E: Send + 'static> TaskSpec<T, E> {
    fn into_job(self) -> Job {
        match self {
            TaskSpec::NoResult { work, on_complete } => Box::new(move || {
                work();
                Box::new(event::named("task.completed", on_complete)) as BoxedEvent
            }),
            TaskSpec::SingleResult { work, on_complete } => Box::new(move || {
                let value = work();
                Box::new(event::named("task.completed", move || on_complete(value))) as BoxedEvent
            }),
            TaskSpec::Fallible {
                work,
                on_complete,
                on_error,
            } => Box::new(move || match work() {
                Ok(value) => {
                    Box::new(event::named("task.completed", move || on_complete(value)))
                        as BoxedEvent
                }
                Err(err) => {
                    Box::new(event::named("task.failed", move || on_error(err))) as BoxedEvent
                }
            }),
        }
    }
}

/// Handle to a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    id: Uuid,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

struct QueuedJob {
    id: Uuid,
    job: Job,
}

/// Fixed-size pool of workers running background jobs.
pub struct TaskModule {
    queue: EventQueue,
    workers: usize,
    jobs: mpsc::UnboundedSender<QueuedJob>,
    backlog: Arc<Mutex<mpsc::UnboundedReceiver<QueuedJob>>>,
    waiting: AtomicUsize,
    started: AtomicBool,
}

impl TaskModule {
    pub fn new(queue: EventQueue, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(EventLoopError::ZeroWorkers);
        }
        let (jobs, backlog) = mpsc::unbounded_channel();
        Ok(Self {
            queue,
            workers,
            jobs,
            backlog: Arc::new(Mutex::new(backlog)),
            waiting: AtomicUsize::new(0),
            started: AtomicBool::new(false),
        })
    }

    /// Submit a task. Work starts once a worker is free.
    pub fn make_task<T, E>(&self, spec: TaskSpec<T, E>) -> Result<TaskHandle>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let handle = TaskHandle { id: Uuid::new_v4() };
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedJob {
            id: handle.id,
            job: spec.into_job(),
        };
        if self.jobs.send(queued).is_err() {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(EventLoopError::module(NAME, "task pool stopped"));
        }

        debug!(task_id = %handle.id, "task submitted");
        Ok(handle)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Tasks submitted but not yet picked up by a worker.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    async fn next_job(&self, shutdown: &CancellationToken) -> Option<QueuedJob> {
        let mut backlog = self.backlog.lock().await;
        let next = tokio::select! {
            _ = shutdown.cancelled() => None,
            next = backlog.recv() => next,
        };
        if next.is_some() {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        next
    }

    /// Refuse further submissions and discard jobs no worker picked up.
    async fn close_backlog(&self) -> usize {
        let mut backlog = self.backlog.lock().await;
        backlog.close();
        let mut dropped = 0;
        while backlog.try_recv().is_ok() {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            dropped += 1;
        }
        dropped
    }

    async fn run_worker(self: Arc<Self>, worker: usize, shutdown: CancellationToken) {
        debug!(worker, "task worker started");

        while let Some(QueuedJob { id, job }) = self.next_job(&shutdown).await {
            let completion = match tokio::task::spawn_blocking(job).await {
                Ok(event) => event,
                Err(e) => {
                    error!(task_id = %id, error = %e, "task work panicked, no callback will run");
                    continue;
                }
            };

            if let Err(e) = self.queue.push_boxed(completion).await {
                warn!(task_id = %id, error = %e, "dropping task completion");
                break;
            }
        }

        debug!(worker, "task worker stopped");
    }
}

#[async_trait]
impl Module for TaskModule {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn exec(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EventLoopError::AlreadyRunning);
        }
        info!(workers = self.workers, waiting = self.waiting(), "task pool started");

        let mut workers = JoinSet::new();
        for worker in 0..self.workers {
            workers.spawn(self.clone().run_worker(worker, shutdown.clone()));
        }
        while workers.join_next().await.is_some() {}

        let dropped = self.close_backlog().await;
        if dropped > 0 {
            warn!(dropped, "dropped tasks that never started");
        }
        info!("task pool stopped");
        Ok(())
    }
}

impl std::fmt::Debug for TaskModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskModule")
            .field("workers", &self.workers)
            .field("waiting", &self.waiting())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn start(workers: usize) -> (Arc<TaskModule>, crate::queue::EventReceiver, CancellationToken) {
        let (queue, rx) = EventQueue::bounded(16).unwrap();
        let module = Arc::new(TaskModule::new(queue, workers).unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(module.clone().exec(shutdown.clone()));
        (module, rx, shutdown)
    }

    #[test]
    fn test_zero_workers_rejected() {
        let (queue, _rx) = EventQueue::bounded(1).unwrap();
        assert!(matches!(
            TaskModule::new(queue, 0),
            Err(EventLoopError::ZeroWorkers)
        ));
    }

    #[tokio::test]
    async fn test_single_result_delivers_value() {
        let (module, mut rx, shutdown) = start(2);
        let seen = Arc::new(StdMutex::new(None));
        let s = seen.clone();

        module
            .make_task(TaskSpec::single_result(
                || 6 * 7,
                move |v| *s.lock().unwrap() = Some(v),
            ))
            .unwrap();

        rx.next().await.unwrap().execute();
        assert_eq!(*seen.lock().unwrap(), Some(42));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_fallible_routes_error() {
        let (module, mut rx, shutdown) = start(1);
        let outcome = Arc::new(StdMutex::new(Vec::new()));
        let ok = outcome.clone();
        let err = outcome.clone();

        module
            .make_task(TaskSpec::fallible(
                || "x".parse::<u32>(),
                move |v| ok.lock().unwrap().push(format!("ok {v}")),
                move |e| err.lock().unwrap().push(format!("err {e}")),
            ))
            .unwrap();

        let event = rx.next().await.unwrap();
        assert_eq!(event.kind(), "task.failed");
        event.execute();

        let outcome = outcome.lock().unwrap();
        assert_eq!(outcome.len(), 1);
        assert!(outcome[0].starts_with("err"));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_no_result_runs_work_off_loop() {
        let (module, mut rx, shutdown) = start(1);
        let worked = Arc::new(StdMutex::new(false));
        let done = Arc::new(StdMutex::new(false));
        let w = worked.clone();
        let d = done.clone();

        module
            .make_task(TaskSpec::no_result(
                move || *w.lock().unwrap() = true,
                move || *d.lock().unwrap() = true,
            ))
            .unwrap();

        let event = rx.next().await.unwrap();
        assert!(*worked.lock().unwrap());
        assert!(!*done.lock().unwrap(), "completion waits for the consumer");
        event.execute();
        assert!(*done.lock().unwrap());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_panicking_work_skips_callback_and_pool_survives() {
        let (module, mut rx, shutdown) = start(1);

        module
            .make_task(TaskSpec::no_result(|| panic!("boom"), || panic!("must not run")))
            .unwrap();
        module
            .make_task(TaskSpec::single_result(|| 1, |_| {}))
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), "task.completed");
        event.execute();
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_stopped_pool_rejects_tasks() {
        let (queue, _rx) = EventQueue::bounded(4).unwrap();
        let module = Arc::new(TaskModule::new(queue, 1).unwrap());
        module.make_task(TaskSpec::no_result(|| {}, || {})).unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        module.clone().exec(shutdown).await.unwrap();

        let err = module
            .make_task(TaskSpec::single_result(|| 1, |_| {}))
            .unwrap_err();
        assert!(matches!(err, EventLoopError::Module { module: "task_pool", .. }));
        assert_eq!(module.waiting(), 0);
    }

    #[tokio::test]
    async fn test_tasks_wait_until_start() {
        let (queue, _rx) = EventQueue::bounded(4).unwrap();
        let module = TaskModule::new(queue, 1).unwrap();
        module.make_task(TaskSpec::no_result(|| {}, || {})).unwrap();
        module.make_task(TaskSpec::no_result(|| {}, || {})).unwrap();
        assert_eq!(module.waiting(), 2);
    }
}
