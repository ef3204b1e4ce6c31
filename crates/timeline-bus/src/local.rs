//! In-process event bus.
//!
//! Each subscriber owns a bounded `mpsc` queue of `queue_depth` events.
//! Publishing first reserves a slot on every subscriber's queue and only
//! then sends; if any queue is full the reservations are released and the
//! publish fails with [`PublishError::Saturated`]. A post is therefore
//! enqueued for every subscriber or for none.
//!
//! Sequence assignment, reservation, and sending all happen under one
//! lock, so every subscriber sees events in sequence order.

use std::collections::VecDeque;
use std::sync::Arc;

use timeline_types::{Post, PostEvent};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::error::{BusError, PublishError};
use crate::subscription::Subscription;
use crate::EventBus;

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Sizing knobs for [`LocalBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Maximum events buffered per subscriber before publishes are refused.
    pub queue_depth: usize,
    /// Number of recent events replayed to each new subscriber (0 = none).
    pub backlog: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            backlog: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    subscribers: Vec<mpsc::Sender<PostEvent>>,
    backlog: VecDeque<PostEvent>,
    last_sequence: u64,
    closed: bool,
}

/// Shared in-process bus. Cloning yields another handle to the same bus.
#[derive(Debug, Clone)]
pub struct LocalBus {
    inner: Arc<Mutex<Inner>>,
    config: BusConfig,
}

impl LocalBus {
    /// Create a bus with the given sizing.
    ///
    /// A `queue_depth` of 0 is treated as 1.
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            config: BusConfig {
                queue_depth: config.queue_depth.max(1),
                backlog: config.backlog,
            },
        }
    }

    /// The effective configuration.
    pub const fn config(&self) -> BusConfig {
        self.config
    }

    /// Number of subscribers whose receiving end is still alive.
    pub async fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.subscribers.iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Close the bus.
    ///
    /// Further publishes fail with [`PublishError::Closed`]. Subscribers
    /// drain what is already queued and then see the end of the stream.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.subscribers.clear();
        info!("local event bus closed");
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus for LocalBus {
    async fn publish(&self, post: Post) -> Result<PostEvent, PublishError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.closed {
            return Err(PublishError::Closed);
        }

        inner.subscribers.retain(|tx| !tx.is_closed());

        let mut permits = Vec::with_capacity(inner.subscribers.len());
        for tx in &inner.subscribers {
            match tx.try_reserve() {
                Ok(permit) => permits.push(permit),
                Err(TrySendError::Full(())) => {
                    debug!(
                        author = %post.user_id,
                        depth = self.config.queue_depth,
                        "subscriber queue full, refusing publish"
                    );
                    return Err(PublishError::Saturated {
                        depth: self.config.queue_depth,
                    });
                }
                // Receiver dropped since the retain above; it gets nothing.
                Err(TrySendError::Closed(())) => {}
            }
        }

        let sequence = inner.last_sequence.saturating_add(1);
        inner.last_sequence = sequence;
        let event = PostEvent { sequence, post };

        let delivered_to = permits.len();
        for permit in permits {
            permit.send(event.clone());
        }

        if self.config.backlog > 0 {
            inner.backlog.push_back(event.clone());
            while inner.backlog.len() > self.config.backlog {
                inner.backlog.pop_front();
            }
        }

        debug!(
            sequence,
            author = %event.post.user_id,
            subscribers = delivered_to,
            "published post event"
        );
        Ok(event)
    }

    async fn subscribe(&self) -> Result<Subscription, BusError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(BusError::Closed);
        }

        let (tx, rx) = mpsc::channel(self.config.queue_depth);
        let replay: Vec<PostEvent> = inner.backlog.iter().cloned().collect();
        inner.subscribers.push(tx);
        debug!(
            subscribers = inner.subscribers.len(),
            replayed = replay.len(),
            "new local bus subscriber"
        );

        let live = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Subscription::new(
            futures::StreamExt::chain(futures::stream::iter(replay), live),
        ))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use timeline_types::UserId;

    use super::*;

    fn post(author: u64, text: &str) -> Post {
        Post::now(UserId(author), text)
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event_in_order() {
        let bus = LocalBus::default();
        let mut a = bus.subscribe().await.unwrap();
        let mut b = bus.subscribe().await.unwrap();

        for text in ["one", "two", "three"] {
            bus.publish(post(1, text)).await.unwrap();
        }

        for sub in [&mut a, &mut b] {
            let texts = [
                sub.next().await.unwrap(),
                sub.next().await.unwrap(),
                sub.next().await.unwrap(),
            ];
            assert_eq!(texts[0].post.text, "one");
            assert_eq!(texts[1].post.text, "two");
            assert_eq!(texts[2].post.text, "three");
            assert!(texts[0].sequence < texts[1].sequence);
            assert!(texts[1].sequence < texts[2].sequence);
        }
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = LocalBus::default();
        bus.publish(post(1, "early")).await.unwrap();

        let mut late = bus.subscribe().await.unwrap();
        bus.publish(post(1, "late")).await.unwrap();

        assert_eq!(late.next().await.unwrap().post.text, "late");
    }

    #[tokio::test]
    async fn backlog_replays_recent_events_without_gaps() {
        let bus = LocalBus::new(BusConfig {
            queue_depth: 8,
            backlog: 2,
        });
        for text in ["a", "b", "c"] {
            bus.publish(post(1, text)).await.unwrap();
        }

        let mut sub = bus.subscribe().await.unwrap();
        bus.publish(post(1, "d")).await.unwrap();

        let seen: Vec<String> = [
            sub.next().await.unwrap(),
            sub.next().await.unwrap(),
            sub.next().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.post.text)
        .collect();
        assert_eq!(seen, vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn saturated_queue_rejects_without_partial_enqueue() {
        let bus = LocalBus::new(BusConfig {
            queue_depth: 1,
            backlog: 0,
        });
        let mut fast = bus.subscribe().await.unwrap();
        let mut slow = bus.subscribe().await.unwrap();

        bus.publish(post(1, "first")).await.unwrap();
        // Drain only the fast subscriber; the slow one stays full.
        assert_eq!(fast.next().await.unwrap().post.text, "first");

        let err = bus.publish(post(1, "second")).await.unwrap_err();
        assert!(matches!(err, PublishError::Saturated { depth: 1 }));

        // Once the slow subscriber drains, publishing resumes and the
        // refused post was never delivered to anyone.
        assert_eq!(slow.next().await.unwrap().post.text, "first");
        let third = bus.publish(post(1, "third")).await.unwrap();
        assert_eq!(fast.next().await.unwrap(), third);
        assert_eq!(slow.next().await.unwrap(), third);
    }

    #[tokio::test]
    async fn refused_publish_does_not_consume_a_sequence_number() {
        let bus = LocalBus::new(BusConfig {
            queue_depth: 1,
            backlog: 0,
        });
        let mut sub = bus.subscribe().await.unwrap();
        let first = bus.publish(post(1, "a")).await.unwrap();
        assert!(bus.publish(post(1, "b")).await.is_err());
        sub.next().await.unwrap();
        let next = bus.publish(post(1, "c")).await.unwrap();
        assert_eq!(next.sequence, first.sequence + 1);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = LocalBus::new(BusConfig {
            queue_depth: 1,
            backlog: 0,
        });
        let sub = bus.subscribe().await.unwrap();
        drop(sub);
        // Would saturate if the dead queue were still counted.
        bus.publish(post(1, "a")).await.unwrap();
        bus.publish(post(1, "b")).await.unwrap();
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn closed_bus_refuses_publish_and_subscribe() {
        let bus = LocalBus::default();
        let mut sub = bus.subscribe().await.unwrap();
        bus.publish(post(1, "before close")).await.unwrap();
        bus.close().await;

        assert!(matches!(
            bus.publish(post(1, "after")).await,
            Err(PublishError::Closed)
        ));
        assert!(matches!(bus.subscribe().await, Err(BusError::Closed)));

        assert_eq!(sub.next().await.unwrap().post.text, "before close");
        assert!(sub.next().await.is_none());
    }
}
