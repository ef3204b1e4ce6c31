//! Error types for the fan-out pipeline.
//!
//! None of these abort a worker. Resolution and write failures end up in a
//! [`DeliveryReport`](crate::report::DeliveryReport) after their retries
//! run out; subscription failures surface from
//! [`WorkerPool::start`](crate::pool::WorkerPool::start).

use timeline_bus::BusError;
use timeline_store::StoreError;
use timeline_types::UserId;

/// Errors that can occur while fanning a post out.
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    /// The follower graph could not be read for the post's author.
    #[error("failed to resolve followers of {author} after {attempts} attempts: {source}")]
    FollowerResolution {
        /// The post author.
        author: UserId,
        /// Attempts made before giving up.
        attempts: u32,
        /// The last store error.
        #[source]
        source: StoreError,
    },

    /// Appending to one follower's timeline failed.
    #[error("failed to append to timeline of {follower}: {source}")]
    TimelineWrite {
        /// The follower whose timeline rejected the write.
        follower: UserId,
        /// The store error.
        #[source]
        source: StoreError,
    },

    /// A worker could not subscribe to the event bus.
    #[error("event bus subscription failed: {0}")]
    Subscribe(#[from] BusError),
}
