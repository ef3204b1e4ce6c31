//! Post publisher: stamps a post and hands it to the event bus.

use std::sync::Arc;

use timeline_bus::{EventBus, PublishError};
use timeline_types::{Post, PostEvent, UserId};
use tracing::{debug, warn};

/// Accepts new posts and enqueues them for fan-out.
#[derive(Debug)]
pub struct Publisher<B> {
    bus: Arc<B>,
}

impl<B: EventBus> Publisher<B> {
    /// Create a publisher over a shared bus handle.
    pub const fn new(bus: Arc<B>) -> Self {
        Self { bus }
    }

    /// Publish `text` as a new post by `user_id`.
    ///
    /// The post is stamped with the current UTC time (whole seconds) and
    /// returned once the bus has accepted it. Fan-out happens later, on the
    /// workers.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the bus is closed, unreachable, or
    /// saturated. Nothing was enqueued in that case and the caller decides
    /// whether to try again.
    pub async fn publish(
        &self,
        user_id: UserId,
        text: impl Into<String> + Send,
    ) -> Result<Post, PublishError> {
        self.publish_event(user_id, text).await.map(|event| event.post)
    }

    /// Like [`publish`](Self::publish), but also returns the bus sequence
    /// number assigned to the post.
    ///
    /// # Errors
    ///
    /// Same as [`publish`](Self::publish).
    pub async fn publish_event(
        &self,
        user_id: UserId,
        text: impl Into<String> + Send,
    ) -> Result<PostEvent, PublishError> {
        let post = Post::now(user_id, text);
        match self.bus.publish(post).await {
            Ok(event) => {
                debug!(sequence = event.sequence, author = %user_id, "post accepted");
                Ok(event)
            }
            Err(e) => {
                warn!(author = %user_id, error = %e, "post rejected by event bus");
                Err(e)
            }
        }
    }
}

impl<B> Clone for Publisher<B> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
        }
    }
}
