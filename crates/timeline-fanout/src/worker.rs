//! Fan-out worker: one post in, one timeline entry per follower out.
//!
//! Processing a post walks a small state machine:
//!
//! ```text
//! Idle --> ResolvingFollowers --> WritingEntries --> Idle
//!                 |                                  ^
//!                 +------ (resolution exhausted) ----+
//! ```
//!
//! 1. Resolve the author's follower set. This is the one read whose cost
//!    grows with follower count. A failure here means nothing has been
//!    written yet, so the whole resolution is retried with backoff.
//! 2. Append the entry to every follower's timeline, up to
//!    `write_concurrency` appends in flight. A failed append only affects
//!    that follower: it goes into a retry set that is retried with backoff
//!    until the attempt budget runs out.
//!
//! Entries already written are never rolled back.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::StreamExt as _;
use timeline_store::{FollowerGraph, StoreError, TimelineStore};
use timeline_types::{FollowerSet, NewEntry, PostEvent, UserId};
use tracing::{debug, error, warn};

use crate::error::FanoutError;
use crate::report::DeliveryReport;
use crate::retry::RetryPolicy;

/// Default number of timeline appends in flight per post.
pub const DEFAULT_WRITE_CONCURRENCY: usize = 64;

/// Where a worker is in processing its current post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for the next post.
    Idle = 0,
    /// Reading the author's follower set.
    ResolvingFollowers = 1,
    /// Appending entries to follower timelines.
    WritingEntries = 2,
}

impl WorkerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::ResolvingFollowers,
            2 => Self::WritingEntries,
            _ => Self::Idle,
        }
    }
}

/// Tuning for a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Maximum concurrent appends for one post. Values below 1 act as 1.
    pub write_concurrency: usize,
    /// Backoff for both follower resolution and per-follower writes.
    pub retry: RetryPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Resolves followers for a post and writes its timeline entries.
#[derive(Debug)]
pub struct FanoutWorker<G, T> {
    graph: Arc<G>,
    timelines: Arc<T>,
    settings: WorkerSettings,
    state: AtomicU8,
}

impl<G, T> FanoutWorker<G, T>
where
    G: FollowerGraph,
    T: TimelineStore,
{
    /// Create a worker over shared store handles.
    pub const fn new(graph: Arc<G>, timelines: Arc<T>, settings: WorkerSettings) -> Self {
        Self {
            graph,
            timelines,
            settings,
            state: AtomicU8::new(WorkerState::Idle as u8),
        }
    }

    /// Current state of the worker.
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Fan `event` out to every follower of its author.
    ///
    /// Always returns a report; failures are recorded in it rather than
    /// returned, so the caller can move straight on to the next post.
    pub async fn process(&self, event: &PostEvent) -> DeliveryReport {
        let author = event.post.user_id;

        self.set_state(WorkerState::ResolvingFollowers);
        let (followers, resolution_attempts) = match self.resolve_followers(author).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.set_state(WorkerState::Idle);
                let attempts = match &e {
                    FanoutError::FollowerResolution { attempts, .. } => *attempts,
                    _ => self.settings.retry.attempts(),
                };
                error!(
                    sequence = event.sequence,
                    author = %author,
                    attempts,
                    error = %e,
                    "post undelivered: follower resolution failed"
                );
                return DeliveryReport::undelivered(event, attempts, e.to_string());
            }
        };

        self.set_state(WorkerState::WritingEntries);
        let follower_count = followers.len();
        let entry = NewEntry::for_post(&event.post);
        let (failed, last_error) = self.write_all(&followers, &entry).await;
        self.set_state(WorkerState::Idle);

        if failed.is_empty() {
            debug!(
                sequence = event.sequence,
                author = %author,
                followers = follower_count,
                "post delivered"
            );
        } else {
            warn!(
                sequence = event.sequence,
                author = %author,
                followers = follower_count,
                failed = failed.len(),
                failed_followers = ?failed,
                "post partially delivered: followers exhausted write retries"
            );
        }

        DeliveryReport::written(
            event,
            resolution_attempts,
            follower_count,
            failed,
            last_error.map(|e| e.to_string()),
        )
    }

    /// Read the follower set, retrying the whole read on failure.
    async fn resolve_followers(&self, author: UserId) -> Result<(FollowerSet, u32), FanoutError> {
        let max_attempts = self.settings.retry.attempts();
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            match self.graph.members(author).await {
                Ok(followers) => return Ok((followers, attempt)),
                Err(source) if attempt >= max_attempts => {
                    return Err(FanoutError::FollowerResolution {
                        author,
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    warn!(
                        author = %author,
                        attempt,
                        error = %e,
                        "follower resolution failed, retrying"
                    );
                    self.settings.retry.wait(attempt).await;
                }
            }
        }
    }

    /// Write `entry` to every follower, retrying only the ones that failed.
    ///
    /// Returns the followers that never succeeded and the last error seen.
    async fn write_all(
        &self,
        followers: &FollowerSet,
        entry: &NewEntry,
    ) -> (Vec<UserId>, Option<FanoutError>) {
        let max_attempts = self.settings.retry.attempts();
        let mut pending: Vec<UserId> = followers.iter().copied().collect();
        let mut last_error = None;
        let mut attempt = 0_u32;

        while !pending.is_empty() {
            attempt = attempt.saturating_add(1);
            let failures = self.write_round(&pending, entry).await;

            pending = Vec::with_capacity(failures.len());
            for (follower, source) in failures {
                debug!(
                    follower = %follower,
                    attempt,
                    error = %source,
                    "timeline append failed"
                );
                pending.push(follower);
                last_error = Some(FanoutError::TimelineWrite { follower, source });
            }

            if pending.is_empty() || attempt >= max_attempts {
                break;
            }
            debug!(
                retrying = pending.len(),
                attempt,
                "retrying failed timeline appends"
            );
            self.settings.retry.wait(attempt).await;
        }

        pending.sort_unstable();
        (pending, last_error)
    }

    /// One concurrent pass of appends over `followers`.
    async fn write_round(
        &self,
        followers: &[UserId],
        entry: &NewEntry,
    ) -> Vec<(UserId, StoreError)> {
        futures::stream::iter(followers.iter().copied())
            .map(|follower| {
                let entry = entry.clone();
                async move { (follower, self.timelines.append(follower, entry).await) }
            })
            .buffer_unordered(self.settings.write_concurrency.max(1))
            .filter_map(|(follower, result)| async move { result.err().map(|e| (follower, e)) })
            .collect()
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicU32;

    use timeline_store::MemoryStore;
    use timeline_types::{FollowEdge, Post, TimelineEntry};

    use super::*;
    use crate::report::DeliveryOutcome;

    /// Graph that fails the first `failures` reads, then delegates.
    struct FlakyGraph {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    impl FollowerGraph for FlakyGraph {
        async fn add_edge(&self, edge: FollowEdge) -> Result<(), StoreError> {
            self.inner.add_edge(edge).await
        }

        async fn remove_edge(&self, edge: FollowEdge) -> Result<(), StoreError> {
            self.inner.remove_edge(edge).await
        }

        async fn members(&self, followee: UserId) -> Result<FollowerSet, StoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left.saturating_sub(1), Ordering::SeqCst);
                return Err(StoreError::Unavailable("graph offline".to_owned()));
            }
            self.inner.members(followee).await
        }
    }

    /// Timeline store that always rejects writes for `broken` users.
    struct PartiallyBrokenTimelines {
        inner: MemoryStore,
        broken: BTreeSet<UserId>,
    }

    impl TimelineStore for PartiallyBrokenTimelines {
        async fn append(&self, user: UserId, entry: NewEntry) -> Result<TimelineEntry, StoreError> {
            if self.broken.contains(&user) {
                return Err(StoreError::Unavailable(format!("shard for {user} down")));
            }
            self.inner.append(user, entry).await
        }

        async fn top(&self, user: UserId, n: usize) -> Result<Vec<TimelineEntry>, StoreError> {
            self.inner.top(user, n).await
        }

        async fn entry_count(&self, user: UserId) -> Result<usize, StoreError> {
            self.inner.entry_count(user).await
        }
    }

    /// Timeline store that fails the first `failures` appends for `flaky`.
    struct FlakyTimelines {
        inner: MemoryStore,
        flaky: UserId,
        failures: AtomicU32,
        attempts: AtomicU32,
    }

    impl TimelineStore for FlakyTimelines {
        async fn append(&self, user: UserId, entry: NewEntry) -> Result<TimelineEntry, StoreError> {
            if user == self.flaky {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                let left = self.failures.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures.store(left.saturating_sub(1), Ordering::SeqCst);
                    return Err(StoreError::Unavailable(format!("timeline {user} busy")));
                }
            }
            self.inner.append(user, entry).await
        }

        async fn top(&self, user: UserId, n: usize) -> Result<Vec<TimelineEntry>, StoreError> {
            self.inner.top(user, n).await
        }

        async fn entry_count(&self, user: UserId) -> Result<usize, StoreError> {
            self.inner.entry_count(user).await
        }
    }

    fn event(author: u64, text: &str) -> PostEvent {
        PostEvent {
            sequence: 1,
            post: Post::now(UserId(author), text),
        }
    }

    fn settings(max_attempts: u32) -> WorkerSettings {
        WorkerSettings {
            write_concurrency: 4,
            retry: RetryPolicy::immediate(max_attempts),
        }
    }

    async fn follow(store: &MemoryStore, follower: u64, followee: u64) {
        store
            .add_edge(FollowEdge::new(UserId(follower), UserId(followee)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn writes_one_entry_per_follower() {
        let store = Arc::new(MemoryStore::new());
        for f in [11, 12, 13] {
            follow(&store, f, 1).await;
        }
        let worker = FanoutWorker::new(Arc::clone(&store), Arc::clone(&store), settings(3));

        let report = worker.process(&event(1, "hello")).await;
        assert_eq!(report.outcome, DeliveryOutcome::Delivered);
        assert_eq!(report.followers, 3);
        assert_eq!(report.delivered, 3);
        assert_eq!(worker.state(), WorkerState::Idle);

        for f in [11, 12, 13] {
            let top = store.top(UserId(f), 10).await.unwrap();
            assert_eq!(top.len(), 1);
            assert_eq!(top[0].author_id, UserId(1));
            assert_eq!(top[0].text, "hello");
        }
        assert!(store.top(UserId(14), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn author_without_followers_is_delivered_trivially() {
        let store = Arc::new(MemoryStore::new());
        let worker = FanoutWorker::new(Arc::clone(&store), Arc::clone(&store), settings(1));
        let report = worker.process(&event(5, "into the void")).await;
        assert!(report.is_complete());
        assert_eq!(report.followers, 0);
    }

    #[tokio::test]
    async fn resolution_is_retried_until_it_succeeds() {
        let graph = FlakyGraph {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(2),
        };
        graph
            .add_edge(FollowEdge::new(UserId(2), UserId(1)))
            .await
            .unwrap();
        let timelines = Arc::new(MemoryStore::new());
        let worker = FanoutWorker::new(Arc::new(graph), Arc::clone(&timelines), settings(3));

        let report = worker.process(&event(1, "eventually")).await;
        assert!(report.is_complete());
        assert_eq!(report.resolution_attempts, 3);
        assert_eq!(timelines.entry_count(UserId(2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausted_resolution_is_reported_undelivered() {
        let graph = FlakyGraph {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(10),
        };
        let worker = FanoutWorker::new(Arc::new(graph), Arc::new(MemoryStore::new()), settings(2));

        let report = worker.process(&event(1, "lost?")).await;
        assert_eq!(report.outcome, DeliveryOutcome::Undelivered);
        assert_eq!(report.resolution_attempts, 2);
        assert!(report.error.is_some());
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn one_broken_follower_does_not_block_the_others() {
        let graph = Arc::new(MemoryStore::new());
        for f in [21, 22, 23] {
            follow(&graph, f, 1).await;
        }
        let timelines = Arc::new(PartiallyBrokenTimelines {
            inner: MemoryStore::new(),
            broken: BTreeSet::from([UserId(22)]),
        });
        let worker = FanoutWorker::new(graph, Arc::clone(&timelines), settings(3));

        let report = worker.process(&event(1, "isolated")).await;
        assert_eq!(report.outcome, DeliveryOutcome::PartiallyDelivered);
        assert_eq!(report.failed, vec![UserId(22)]);
        assert_eq!(report.delivered, 2);
        assert!(report.error.is_some());

        assert_eq!(timelines.top(UserId(21), 10).await.unwrap()[0].text, "isolated");
        assert_eq!(timelines.top(UserId(23), 10).await.unwrap()[0].text, "isolated");
        assert!(timelines.top(UserId(22), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_write_failure_is_retried_to_delivery() {
        let graph = Arc::new(MemoryStore::new());
        for f in [31, 32, 33] {
            follow(&graph, f, 1).await;
        }
        let timelines = Arc::new(FlakyTimelines {
            inner: MemoryStore::new(),
            flaky: UserId(32),
            failures: AtomicU32::new(2),
            attempts: AtomicU32::new(0),
        });
        let worker = FanoutWorker::new(graph, Arc::clone(&timelines), settings(3));

        let report = worker.process(&event(1, "retried")).await;
        assert_eq!(report.outcome, DeliveryOutcome::Delivered);
        assert!(report.failed.is_empty());
        assert!(report.error.is_none());
        assert_eq!(report.delivered, 3);
        assert_eq!(timelines.attempts.load(Ordering::SeqCst), 3);

        let top = timelines.top(UserId(32), 10).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].text, "retried");
        for f in [31, 33] {
            assert_eq!(timelines.entry_count(UserId(f)).await.unwrap(), 1);
        }
    }
}
