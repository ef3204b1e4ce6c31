//! Home timeline reads.
//!
//! Reads go straight to the timeline store. Fan-out already did the work,
//! so a read is a single bounded range lookup with no side effects.

use std::sync::Arc;

use timeline_store::{StoreError, TimelineStore};
use timeline_types::{TimelineEntry, UserId};

/// Entries returned when the caller does not ask for a specific count.
pub const DEFAULT_TIMELINE_LIMIT: usize = 10;

/// Serves bounded reads of users' home timelines.
#[derive(Debug)]
pub struct TimelineReader<T> {
    timelines: Arc<T>,
    default_limit: usize,
}

impl<T: TimelineStore> TimelineReader<T> {
    /// Create a reader returning [`DEFAULT_TIMELINE_LIMIT`] entries by default.
    pub const fn new(timelines: Arc<T>) -> Self {
        Self {
            timelines,
            default_limit: DEFAULT_TIMELINE_LIMIT,
        }
    }

    /// Override the default number of entries returned.
    #[must_use]
    pub const fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    /// The `limit` most recent entries on `user`'s home timeline, newest
    /// first.
    ///
    /// A user with no entries yet gets an empty vector.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only if the store itself fails.
    pub async fn home_timeline(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<TimelineEntry>, StoreError> {
        self.timelines.top(user, limit).await
    }

    /// [`home_timeline`](Self::home_timeline) with the default limit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only if the store itself fails.
    pub async fn home_timeline_default(
        &self,
        user: UserId,
    ) -> Result<Vec<TimelineEntry>, StoreError> {
        self.home_timeline(user, self.default_limit).await
    }
}
