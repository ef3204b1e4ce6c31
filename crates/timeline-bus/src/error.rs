//! Error types for the event bus.

/// Errors returned to the caller of `publish`.
///
/// These are surfaced, never retried inside the bus. A failed publish has
/// enqueued the post for no subscriber at all.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// A subscriber queue is at its depth limit (backpressure).
    #[error("event bus saturated: subscriber queue at depth limit {depth}")]
    Saturated {
        /// The configured per-subscriber queue depth.
        depth: usize,
    },

    /// The bus has been closed.
    #[error("event bus closed")]
    Closed,

    /// The transport could not accept the event.
    #[error("event bus unavailable: {0}")]
    Unavailable(String),

    /// The event could not be encoded for the wire.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can occur when subscribing or connecting.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus has been closed and accepts no new subscribers.
    #[error("event bus closed")]
    Closed,

    /// Failed to connect to or communicate with the NATS server.
    #[error("NATS error: {0}")]
    Nats(String),
}
