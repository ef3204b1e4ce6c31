//! NATS-backed event bus.
//!
//! Every post event is published as JSON on a single subject (by default
//! [`DEFAULT_SUBJECT`]). Plain NATS subjects are broadcast: each
//! subscription receives every message, in the order a single publishing
//! connection sent them. There is no durable backlog, so a worker that is
//! not subscribed when a post goes out never sees it.
//!
//! Sequence numbers come from a counter local to this [`NatsBus`] and are
//! assigned under the same lock that performs the publish, so sequence
//! order equals wire order for one publishing process.

use async_nats::connection::State;
use futures::StreamExt as _;
use timeline_types::{Post, PostEvent};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BusError, PublishError};
use crate::subscription::Subscription;
use crate::EventBus;

/// Subject carrying post events.
pub const DEFAULT_SUBJECT: &str = "timeline.posts";

/// NATS client wrapper acting as the post event bus.
pub struct NatsBus {
    client: async_nats::Client,
    subject: String,
    last_sequence: Mutex<u64>,
}

impl NatsBus {
    /// Connect to a NATS server and use `subject` as the post topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Nats`] if the connection cannot be established.
    pub async fn connect(url: &str, subject: &str) -> Result<Self, BusError> {
        info!(url = url, subject = subject, "connecting to NATS server");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Nats(format!("failed to connect to {url}: {e}")))?;
        info!("NATS connection established");
        Ok(Self::new(client, subject))
    }

    /// Wrap an already connected client.
    pub fn new(client: async_nats::Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_owned(),
            last_sequence: Mutex::new(0),
        }
    }

    /// The subject posts are published on.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Flush all pending messages to the NATS server.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Unavailable`] if the flush fails.
    pub async fn flush(&self) -> Result<(), PublishError> {
        self.client
            .flush()
            .await
            .map_err(|e| PublishError::Unavailable(format!("flush failed: {e}")))
    }

    /// Deserialize a NATS message payload into a [`PostEvent`].
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] if the payload is not a
    /// valid event.
    pub fn decode_event(data: &[u8]) -> Result<PostEvent, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

impl std::fmt::Debug for NatsBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBus")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl EventBus for NatsBus {
    async fn publish(&self, post: Post) -> Result<PostEvent, PublishError> {
        if matches!(self.client.connection_state(), State::Disconnected) {
            return Err(PublishError::Unavailable(
                "NATS connection is down".to_owned(),
            ));
        }

        let mut last_sequence = self.last_sequence.lock().await;
        let sequence = last_sequence.saturating_add(1);
        let event = PostEvent { sequence, post };
        let payload = serde_json::to_vec(&event)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| {
                PublishError::Unavailable(format!("failed to publish to {}: {e}", self.subject))
            })?;
        *last_sequence = sequence;

        debug!(
            subject = self.subject,
            sequence,
            author = %event.post.user_id,
            "published post event"
        );
        Ok(event)
    }

    async fn subscribe(&self) -> Result<Subscription, BusError> {
        let subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| {
                BusError::Nats(format!("failed to subscribe to {}: {e}", self.subject))
            })?;
        info!(subject = self.subject, "subscribed to post events");

        let events = subscriber.filter_map(|message| async move {
            match Self::decode_event(&message.payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(
                        subject = %message.subject,
                        error = %e,
                        "failed to decode post event, skipping"
                    );
                    None
                }
            }
        });
        Ok(Subscription::new(events))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use timeline_types::UserId;

    use super::*;

    #[test]
    fn decode_valid_event() {
        let json = serde_json::json!({
            "sequence": 3,
            "post": {
                "user_id": 42,
                "timestamp": "2024-01-01T12:00:00Z",
                "text": "hello"
            }
        });
        let bytes = serde_json::to_vec(&json).unwrap();
        let event = NatsBus::decode_event(&bytes).unwrap();
        assert_eq!(event.sequence, 3);
        assert_eq!(event.post.user_id, UserId(42));
        assert_eq!(event.post.text, "hello");
    }

    #[test]
    fn decode_invalid_event() {
        assert!(NatsBus::decode_event(b"not valid json").is_err());
    }

    // Integration tests that require a live NATS server are marked #[ignore].
    #[tokio::test]
    #[ignore = "requires live NATS server"]
    async fn publish_reaches_subscriber() {
        let bus = NatsBus::connect("nats://localhost:4222", "timeline.test")
            .await
            .unwrap();
        let mut sub = bus.subscribe().await.unwrap();
        let sent = bus.publish(Post::now(UserId(1), "over the wire")).await.unwrap();
        bus.flush().await.unwrap();

        let received = sub.next().await.unwrap();
        assert_eq!(received, sent);
    }
}
