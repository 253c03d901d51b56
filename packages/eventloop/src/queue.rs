//! Bounded hand-off queue between module workers and the consumer loop.
//!
//! # Guarantees
//!
//! - **FIFO**: events execute in the order they were accepted by the queue
//! - **Single consumer**: exactly one [`EventReceiver`] exists per queue
//! - **Backpressure**: a push into a full queue waits; nothing is dropped and
//!   the buffer never grows past its capacity
//!
//! Waiting producers are served in the order they started waiting, so a busy
//! module cannot starve a quiet one.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{EventLoopError, Result};
use crate::event::{BoxedEvent, Event};

/// Producer handle for the shared event queue.
///
/// Cheap to clone; every module holds one.
#[derive(Clone)]
pub struct EventQueue {
    sender: mpsc::Sender<BoxedEvent>,
}

impl EventQueue {
    /// Create a queue with a fixed capacity.
    ///
    /// Returns the producer handle and the single consumer.
    pub fn bounded(capacity: usize) -> Result<(EventQueue, EventReceiver)> {
        if capacity == 0 {
            return Err(EventLoopError::ZeroCapacity);
        }
        let (sender, receiver) = mpsc::channel(capacity);
        Ok((EventQueue { sender }, EventReceiver { receiver }))
    }

    /// Push an event, waiting while the queue is full.
    pub async fn push<E: Event>(&self, event: E) -> Result<()> {
        self.push_boxed(Box::new(event)).await
    }

    /// Push an already boxed event, waiting while the queue is full.
    pub async fn push_boxed(&self, event: BoxedEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| EventLoopError::QueueClosed)
    }

    /// Push from a blocking thread, parking it while the queue is full.
    ///
    /// Must not be called from inside an async task; use [`push`](Self::push)
    /// there.
    pub fn blocking_push<E: Event>(&self, event: E) -> Result<()> {
        self.sender
            .blocking_send(Box::new(event))
            .map_err(|_| EventLoopError::QueueClosed)
    }

    /// Fixed capacity chosen at construction.
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Number of events currently buffered.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// True when no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// Consumer side of the event queue.
pub struct EventReceiver {
    receiver: mpsc::Receiver<BoxedEvent>,
}

impl EventReceiver {
    /// Pop the next event, waiting while the queue is empty.
    ///
    /// Returns `None` once every producer handle is dropped and the buffer is
    /// drained.
    pub async fn next(&mut self) -> Option<BoxedEvent> {
        self.receiver.recv().await
    }

    /// Run the consumer loop.
    ///
    /// Pops events in arrival order and executes each one to completion
    /// before popping the next. Returns the number of executed events once
    /// the queue closes or `shutdown` is cancelled. Events still buffered at
    /// shutdown are dropped without executing.
    pub async fn run(mut self, shutdown: CancellationToken) -> usize {
        let mut executed = 0usize;

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("shutdown requested, consumer loop stopping");
                    break;
                }
                next = self.receiver.recv() => match next {
                    Some(event) => event,
                    None => {
                        info!("event queue closed, consumer loop stopping");
                        break;
                    }
                },
            };

            trace!(kind = event.kind(), "executing event");
            event.execute();
            executed += 1;
        }

        self.receiver.close();
        let mut dropped = 0usize;
        while self.receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "dropped queued events at shutdown");
        }

        executed
    }
}

impl std::fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReceiver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::from_fn;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            EventQueue::bounded(0),
            Err(EventLoopError::ZeroCapacity)
        ));
    }

    #[tokio::test]
    async fn test_len_tracks_buffered_events() {
        let (queue, mut rx) = EventQueue::bounded(4).unwrap();
        assert_eq!(queue.capacity(), 4);
        assert!(queue.is_empty());

        queue.push(from_fn(|| {})).await.unwrap();
        queue.push(from_fn(|| {})).await.unwrap();
        assert_eq!(queue.len(), 2);

        rx.next().await.unwrap().execute();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_run_executes_in_push_order() {
        let (queue, rx) = EventQueue::bounded(16).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = seen.clone();
            queue
                .push(from_fn(move || seen.lock().unwrap().push(i)))
                .await
                .unwrap();
        }
        drop(queue);

        let executed = rx.run(CancellationToken::new()).await;
        assert_eq!(executed, 10);
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_push_blocks_when_full() {
        let (queue, mut rx) = EventQueue::bounded(1).unwrap();
        queue.push(from_fn(|| {})).await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), queue.push(from_fn(|| {}))).await;
        assert!(blocked.is_err(), "second push should wait for a free slot");

        rx.next().await.unwrap().execute();
        tokio::time::timeout(Duration::from_millis(50), queue.push(from_fn(|| {})))
            .await
            .expect("push should complete once a slot frees up")
            .unwrap();
    }

    #[tokio::test]
    async fn test_push_after_consumer_dropped_fails() {
        let (queue, rx) = EventQueue::bounded(2).unwrap();
        drop(rx);
        assert!(queue.is_closed());
        assert!(matches!(
            queue.push(from_fn(|| {})).await,
            Err(EventLoopError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_drops_pending_events() {
        let (queue, rx) = EventQueue::bounded(8).unwrap();
        let ran = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let ran = ran.clone();
            queue
                .push(from_fn(move || *ran.lock().unwrap() += 1))
                .await
                .unwrap();
        }

        let token = CancellationToken::new();
        token.cancel();
        let executed = rx.run(token).await;

        assert_eq!(executed, 0);
        assert_eq!(*ran.lock().unwrap(), 0);
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_blocking_push_from_blocking_thread() {
        let (queue, mut rx) = EventQueue::bounded(2).unwrap();
        let producer = queue.clone();
        tokio::task::spawn_blocking(move || producer.blocking_push(from_fn(|| {})))
            .await
            .unwrap()
            .unwrap();

        assert!(rx.next().await.is_some());
    }
}
