//! The event abstraction.
//!
//! An [`Event`] is one unit of ready-to-run application work: a fired trigger
//! plus the callback registered for it. Modules construct events when their
//! triggers fire and push them into the [`EventQueue`](crate::EventQueue);
//! the consumer loop pops them and calls [`Event::execute`] exactly once.
//!
//! # Key Properties
//!
//! - **Opaque to the dispatcher**: the loop only knows how to execute
//! - **Consumed once**: `execute` takes `Box<Self>`, so an event cannot run twice
//! - **Infallible**: failures are routed to user error callbacks by the
//!   producing module, never returned through this interface

/// One unit of queued callback work.
///
/// Implemented by every module's concrete event kinds (timer fire, call
/// outcome, HTTP request, websocket open/message/close, task outcome).
///
/// # Example
///
/// ```ignore
/// struct Tick {
///     count: u64,
///     callback: Box<dyn FnOnce(u64) + Send>,
/// }
///
/// impl Event for Tick {
///     fn execute(self: Box<Self>) {
///         (self.callback)(self.count)
///     }
/// }
/// ```
pub trait Event: Send + 'static {
    /// Run the callback this event carries.
    fn execute(self: Box<Self>);

    /// Short stable label for logs.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Boxed, type-erased event as it travels through the queue.
pub type BoxedEvent = Box<dyn Event>;

/// Event backed by a plain closure.
///
/// Useful for producers that have no dedicated event type.
pub struct FnEvent<F> {
    kind: &'static str,
    f: F,
}

impl<F> Event for FnEvent<F>
where
    F: FnOnce() + Send + 'static,
{
    fn execute(self: Box<Self>) {
        (self.f)()
    }

    fn kind(&self) -> &'static str {
        self.kind
    }
}

/// Wrap a closure as an event.
pub fn from_fn<F>(f: F) -> FnEvent<F>
where
    F: FnOnce() + Send + 'static,
{
    FnEvent { kind: "fn", f }
}

/// Wrap a closure as an event with a custom log label.
pub fn named<F>(kind: &'static str, f: F) -> FnEvent<F>
where
    F: FnOnce() + Send + 'static,
{
    FnEvent { kind, f }
}
