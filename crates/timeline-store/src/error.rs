//! Error types for the storage layer.
//!
//! All backends report failures through [`StoreError`]. Absence is never
//! an error: an unknown user has no followers and an empty timeline.

/// Errors that can occur in the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data could not be decoded (bad member, malformed list value).
    #[error("Corrupt data at {key}: {reason}")]
    Corrupt {
        /// The key holding the bad value.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The store cannot currently serve requests.
    ///
    /// The built-in backends report their own failures through the
    /// variants above. This one is for custom [`FollowerGraph`] and
    /// [`TimelineStore`] implementations (proxies, caches, sharded
    /// wrappers) whose backing service is temporarily unreachable. Fan-out
    /// retries it like any other store error.
    ///
    /// [`FollowerGraph`]: crate::FollowerGraph
    /// [`TimelineStore`]: crate::TimelineStore
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
