//! Subscription handle with an explicit stop signal.
//!
//! A [`Subscription`] wraps whatever event stream the bus backend produces
//! and pairs it with a `watch` channel. Calling [`StopHandle::stop`] from
//! any task ends the sequence at the next event boundary; an event that has
//! already been returned is never taken back. Restarting means calling
//! `subscribe` again.

use std::pin::Pin;
use std::sync::Arc;

use futures::{FutureExt as _, Stream, StreamExt as _};
use timeline_types::PostEvent;
use tokio::sync::watch;

/// Boxed stream of events produced by a bus backend.
type EventStream = Pin<Box<dyn Stream<Item = PostEvent> + Send>>;

/// Cloneable handle that stops a [`Subscription`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Signal the subscription to stop. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A live, ordered sequence of events from the bus.
pub struct Subscription {
    events: EventStream,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl Subscription {
    /// Wrap a backend event stream.
    pub fn new(events: impl Stream<Item = PostEvent> + Send + 'static) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            events: Box::pin(events.fuse()),
            stop_tx: Arc::new(tx),
            stop_rx: rx,
        }
    }

    /// Return a handle that can stop this subscription from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription has been stopped or the bus
    /// has closed. A stop requested while waiting wins over an event that
    /// becomes ready at the same moment.
    pub async fn next(&mut self) -> Option<PostEvent> {
        if *self.stop_rx.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.stop_rx.wait_for(|stopped| *stopped) => None,
            event = self.events.next() => event,
        }
    }

    /// Take every event that is already buffered, without waiting.
    ///
    /// Ignores the stop signal, so a stopped subscriber can account for
    /// events the bus accepted but it never processed. Stops at the first
    /// event that is not ready yet or when the stream ends.
    pub fn drain_ready(&mut self) -> Vec<PostEvent> {
        let mut drained = Vec::new();
        while let Some(Some(event)) = self.events.next().now_or_never() {
            drained.push(event);
        }
        drained
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("stopped", &*self.stop_rx.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use timeline_types::{Post, UserId};

    use super::*;

    fn event(sequence: u64) -> PostEvent {
        PostEvent {
            sequence,
            post: Post::now(UserId(1), format!("post {sequence}")),
        }
    }

    #[tokio::test]
    async fn yields_events_in_order_then_ends() {
        let mut sub = Subscription::new(futures::stream::iter(vec![event(1), event(2)]));
        assert_eq!(sub.next().await.unwrap().sequence, 1);
        assert_eq!(sub.next().await.unwrap().sequence, 2);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn stop_before_next_returns_none() {
        let mut sub = Subscription::new(futures::stream::iter(vec![event(1)]));
        let handle = sub.stop_handle();
        handle.stop();
        assert!(handle.is_stopped());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn stop_wakes_a_waiting_subscriber() {
        let mut sub = Subscription::new(futures::stream::pending());
        let handle = sub.stop_handle();

        let waiter = tokio::spawn(async move { sub.next().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn drain_ready_returns_buffered_events_after_stop() {
        let events =
            futures::stream::iter(vec![event(1), event(2)]).chain(futures::stream::pending());
        let mut sub = Subscription::new(events);
        sub.stop_handle().stop();
        assert!(sub.next().await.is_none());

        let drained: Vec<u64> = sub.drain_ready().iter().map(|e| e.sequence).collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(sub.drain_ready().is_empty());
    }

    #[tokio::test]
    async fn drain_after_stream_end_is_empty() {
        let mut sub = Subscription::new(futures::stream::iter(vec![event(1)]));
        assert_eq!(sub.next().await.unwrap().sequence, 1);
        assert!(sub.next().await.is_none());
        assert!(sub.drain_ready().is_empty());
    }
}
