//! Timeline store contract.
//!
//! Each user's home timeline is an append log with the newest entry at the
//! head. The store, not the caller, assigns `received_order`, so ordering
//! is decided at the moment the entry lands.

use std::future::Future;

use timeline_types::{NewEntry, TimelineEntry, UserId};

use crate::error::StoreError;

/// Per-user home timelines, most recent first.
pub trait TimelineStore: Send + Sync {
    /// Push `entry` onto the head of `user`'s timeline.
    ///
    /// The returned entry carries its `received_order`, which is strictly
    /// greater than that of every entry previously appended to the same
    /// timeline. Concurrent appends to one timeline never interleave or
    /// lose entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails. A failed append leaves
    /// the timeline unchanged.
    fn append(
        &self,
        user: UserId,
        entry: NewEntry,
    ) -> impl Future<Output = Result<TimelineEntry, StoreError>> + Send;

    /// Read up to `n` of the most recently appended entries, newest first.
    ///
    /// Returns exactly `min(n, entries)` items and never waits for more.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails. A user with no timeline
    /// gets an empty vector, not an error.
    fn top(
        &self,
        user: UserId,
        n: usize,
    ) -> impl Future<Output = Result<Vec<TimelineEntry>, StoreError>> + Send;

    /// Number of entries currently retained on `user`'s timeline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn entry_count(&self, user: UserId) -> impl Future<Output = Result<usize, StoreError>> + Send;
}
