//! Follower graph contract.
//!
//! For each user the graph holds the set of users following them. The
//! fan-out worker reads one follower set per post; ingestion adds and
//! removes edges.

use std::future::Future;

use timeline_types::{FollowEdge, FollowerSet, UserId};

use crate::error::StoreError;

/// Storage for follow relationships, keyed by followee.
///
/// Implementations must be safe to share between tasks. Every mutation is
/// atomic for its followee key; nothing more is required.
pub trait FollowerGraph: Send + Sync {
    /// Record that `edge.follower_id` follows `edge.followee_id`.
    ///
    /// Idempotent: adding an existing edge is a no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot apply the write.
    fn add_edge(&self, edge: FollowEdge) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a follow relationship.
    ///
    /// Idempotent: removing an absent edge is a no-op. Removal is
    /// forward-only; entries already fanned out stay on the timeline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot apply the write.
    fn remove_edge(&self, edge: FollowEdge)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Snapshot the followers of `followee`.
    ///
    /// Returns an empty set for a user nobody follows. Concurrent writers
    /// may or may not be reflected, but a partially written edge is never
    /// observed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend is unreachable or holds data
    /// that cannot be decoded.
    fn members(
        &self,
        followee: UserId,
    ) -> impl Future<Output = Result<FollowerSet, StoreError>> + Send;
}
