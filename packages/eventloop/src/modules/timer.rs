//! Timer module - periodic and one-shot timers.
//!
//! Each registered timer gets its own worker task once the module starts.
//! On every tick the worker asks the module to *fire* the timer, which looks
//! the registration up under the module lock and builds the event there.
//! Removal takes the same lock, so once [`TimerModule::remove_timer_task`]
//! returns no new event is constructed for that timer. An event built just
//! before removal may still be waiting in the queue and will run once.
//!
//! ```text
//! make_timer_task() ─► timers[id] ─► schedule ─► exec() ─► run_timer(id)
//!                                                             │ tick
//!                                                             ▼
//!                                       fire(id) (under lock) ─► queue.push
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EventLoopError, Result};
use crate::event::Event;
use crate::module::Module;
use crate::queue::EventQueue;

const NAME: &str = "timer";

type PeriodicFn = Box<dyn FnMut(u64) + Send>;
type OneShotFn = Box<dyn FnOnce(u64) + Send>;

/// Whether a timer repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Fires every period until removed.
    Periodic,
    /// Fires once after the delay, then removes itself.
    OneShot,
}

/// Handle to a registered timer.
///
/// Pass it to [`TimerModule::remove_timer_task`] to cancel the timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerTask {
    id: Uuid,
    period: Duration,
    kind: TimerKind,
}

impl TimerTask {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Interval for periodic timers, delay for one-shot timers.
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }
}

enum Callback {
    Periodic(Arc<Mutex<PeriodicFn>>),
    OneShot(OneShotFn),
}

struct TimerEntry {
    task: TimerTask,
    callback: Callback,
    fired: u64,
    cancel: CancellationToken,
}

/// A timer fired; carries the 1-based fire count.
struct TimerFired {
    count: u64,
    callback: Callback,
}

impl Event for TimerFired {
    fn execute(self: Box<Self>) {
        let TimerFired { count, callback } = *self;
        match callback {
            Callback::Periodic(callback) => {
                let mut guard = callback.lock().unwrap_or_else(|e| e.into_inner());
                let f: &mut PeriodicFn = &mut guard;
                f(count);
            }
            Callback::OneShot(f) => f(count),
        }
    }

    fn kind(&self) -> &'static str {
        "timer.fired"
    }
}

/// Periodic and one-shot timers feeding the event queue.
pub struct TimerModule {
    queue: EventQueue,
    timers: Mutex<HashMap<Uuid, TimerEntry>>,
    schedule: mpsc::UnboundedSender<Uuid>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<Uuid>>>,
}

impl TimerModule {
    pub fn new(queue: EventQueue) -> Self {
        let (schedule, pending) = mpsc::unbounded_channel();
        Self {
            queue,
            timers: Mutex::new(HashMap::new()),
            schedule,
            pending: Mutex::new(Some(pending)),
        }
    }

    /// Register a timer that fires every `interval`.
    ///
    /// The first firing happens one interval after the module starts (or
    /// after registration, if the module is already running).
    pub fn make_timer_task<F>(&self, interval: Duration, callback: F) -> Result<TimerTask>
    where
        F: FnMut(u64) + Send + 'static,
    {
        if interval.is_zero() {
            return Err(EventLoopError::InvalidInterval { interval });
        }
        self.register(
            interval,
            TimerKind::Periodic,
            Callback::Periodic(Arc::new(Mutex::new(Box::new(callback)))),
        )
    }

    /// Register a timer that fires once after `delay`.
    pub fn make_one_time_task<F>(&self, delay: Duration, callback: F) -> Result<TimerTask>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.register(delay, TimerKind::OneShot, Callback::OneShot(Box::new(callback)))
    }

    /// Remove a timer. Returns false if it was already gone.
    pub fn remove_timer_task(&self, task: &TimerTask) -> bool {
        match self.timers().remove(&task.id) {
            Some(entry) => {
                entry.cancel.cancel();
                debug!(timer_id = %task.id, "timer removed");
                true
            }
            None => false,
        }
    }

    /// True while the timer can still produce events.
    pub fn is_active(&self, task: &TimerTask) -> bool {
        self.timers().contains_key(&task.id)
    }

    /// Number of registered timers.
    pub fn active_count(&self) -> usize {
        self.timers().len()
    }

    fn register(&self, period: Duration, kind: TimerKind, callback: Callback) -> Result<TimerTask> {
        let task = TimerTask {
            id: Uuid::new_v4(),
            period,
            kind,
        };
        self.timers().insert(
            task.id,
            TimerEntry {
                task: task.clone(),
                callback,
                fired: 0,
                cancel: CancellationToken::new(),
            },
        );

        if self.schedule.send(task.id).is_err() {
            self.timers().remove(&task.id);
            return Err(EventLoopError::module(NAME, "timer module stopped"));
        }

        debug!(timer_id = %task.id, ?kind, ?period, "timer registered");
        Ok(task)
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<Uuid, TimerEntry>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_pending(&self) -> Option<mpsc::UnboundedReceiver<Uuid>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn lookup(&self, id: Uuid) -> Option<(TimerTask, CancellationToken)> {
        self.timers()
            .get(&id)
            .map(|entry| (entry.task.clone(), entry.cancel.clone()))
    }

    /// Build the event for one firing, if the timer is still registered.
    ///
    /// One-shot timers leave the table here.
    fn fire(&self, id: Uuid) -> Option<TimerFired> {
        let mut timers = self.timers();
        let entry = timers.get_mut(&id)?;
        entry.fired += 1;
        let count = entry.fired;

        let periodic = match &entry.callback {
            Callback::Periodic(callback) => Some(callback.clone()),
            Callback::OneShot(_) => None,
        };
        let callback = match periodic {
            Some(callback) => Callback::Periodic(callback),
            None => timers.remove(&id)?.callback,
        };

        Some(TimerFired { count, callback })
    }

    async fn deliver(&self, event: TimerFired) -> bool {
        match self.queue.push(event).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "dropping timer event");
                false
            }
        }
    }

    async fn run_timer(self: Arc<Self>, id: Uuid, shutdown: CancellationToken) {
        let Some((task, cancel)) = self.lookup(id) else {
            return;
        };

        match task.kind {
            TimerKind::OneShot => {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = shutdown.cancelled() => return,
                    _ = time::sleep(task.period) => {}
                }
                if let Some(event) = self.fire(id) {
                    self.deliver(event).await;
                }
            }
            TimerKind::Periodic => {
                let mut ticker = time::interval_at(Instant::now() + task.period, task.period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    let Some(event) = self.fire(id) else {
                        break;
                    };
                    if !self.deliver(event).await {
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Module for TimerModule {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn exec(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut pending = self.take_pending().ok_or(EventLoopError::AlreadyRunning)?;
        info!(timers = self.active_count(), "timer module started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = pending.recv() => match next {
                    Some(id) => {
                        tokio::spawn(self.clone().run_timer(id, shutdown.clone()));
                    }
                    None => break,
                },
            }
        }

        info!("timer module stopped");
        Ok(())
    }
}

impl std::fmt::Debug for TimerModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerModule")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}
