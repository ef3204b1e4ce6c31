//! Event bus carrying published posts to fan-out workers.
//!
//! The bus is a single logical topic with broadcast semantics: every live
//! subscriber sees every event, in publish order. It decouples the rate at
//! which posts are accepted from the rate at which they are fanned out.
//!
//! ```text
//! Publisher --publish--> EventBus --Subscription--> worker 0
//!                                  --Subscription--> worker 1
//!                                  --Subscription--> ...
//! ```
//!
//! A subscriber that is not listening when a post is published does not
//! receive it. [`LocalBus`] can optionally retain a replay backlog for new
//! subscribers; [`NatsBus`] never does.

pub mod error;
pub mod local;
pub mod nats;
pub mod subscription;

use std::future::Future;

use timeline_types::{Post, PostEvent};

pub use error::{BusError, PublishError};
pub use local::{BusConfig, LocalBus};
pub use nats::NatsBus;
pub use subscription::{StopHandle, Subscription};

/// An ordered, at-least-once, broadcast channel for post events.
pub trait EventBus: Send + Sync {
    /// Assign `post` the next sequence number and enqueue it for every
    /// current subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the bus is closed, unreachable, or
    /// saturated. On error nothing was enqueued.
    fn publish(&self, post: Post) -> impl Future<Output = Result<PostEvent, PublishError>> + Send;

    /// Open a new subscription that yields events published from now on.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the bus is closed or the transport refuses
    /// the subscription.
    fn subscribe(&self) -> impl Future<Output = Result<Subscription, BusError>> + Send;
}
