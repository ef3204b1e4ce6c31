//! In-process backend for both stores.
//!
//! Holds the follower graph and every timeline behind `tokio` read-write
//! locks. Used by tests and by single-process deployments that do not need
//! the data to outlive the process.

use std::collections::{BTreeSet, HashMap, VecDeque};

use timeline_types::{FollowEdge, FollowerSet, NewEntry, TimelineEntry, UserId};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::graph::FollowerGraph;
use crate::timeline::TimelineStore;

/// One user's timeline: entries newest-first plus the next order to hand out.
#[derive(Debug, Default)]
struct Timeline {
    entries: VecDeque<TimelineEntry>,
    next_order: u64,
}

/// In-memory follower graph and timeline store.
///
/// `max_len == 0` keeps timelines unbounded; otherwise the oldest entries
/// are dropped once a timeline exceeds `max_len`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    followers: RwLock<HashMap<UserId, BTreeSet<UserId>>>,
    timelines: RwLock<HashMap<UserId, Timeline>>,
    max_len: usize,
}

impl MemoryStore {
    /// Create an empty store with unbounded timelines.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that caps every timeline at `max_len` entries.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len,
            ..Self::default()
        }
    }
}

impl FollowerGraph for MemoryStore {
    async fn add_edge(&self, edge: FollowEdge) -> Result<(), StoreError> {
        let mut followers = self.followers.write().await;
        followers
            .entry(edge.followee_id)
            .or_default()
            .insert(edge.follower_id);
        Ok(())
    }

    async fn remove_edge(&self, edge: FollowEdge) -> Result<(), StoreError> {
        let mut followers = self.followers.write().await;
        if let Some(set) = followers.get_mut(&edge.followee_id) {
            set.remove(&edge.follower_id);
            if set.is_empty() {
                followers.remove(&edge.followee_id);
            }
        }
        Ok(())
    }

    async fn members(&self, followee: UserId) -> Result<FollowerSet, StoreError> {
        let followers = self.followers.read().await;
        Ok(followers.get(&followee).cloned().unwrap_or_default())
    }
}

impl TimelineStore for MemoryStore {
    async fn append(&self, user: UserId, entry: NewEntry) -> Result<TimelineEntry, StoreError> {
        let mut timelines = self.timelines.write().await;
        let timeline = timelines.entry(user).or_default();

        timeline.next_order = timeline.next_order.saturating_add(1);
        let stored = entry.ordered(timeline.next_order);
        timeline.entries.push_front(stored.clone());

        if self.max_len > 0 {
            timeline.entries.truncate(self.max_len);
        }
        Ok(stored)
    }

    async fn top(&self, user: UserId, n: usize) -> Result<Vec<TimelineEntry>, StoreError> {
        let timelines = self.timelines.read().await;
        Ok(timelines
            .get(&user)
            .map(|t| t.entries.iter().take(n).cloned().collect())
            .unwrap_or_default())
    }

    async fn entry_count(&self, user: UserId) -> Result<usize, StoreError> {
        let timelines = self.timelines.read().await;
        Ok(timelines.get(&user).map_or(0, |t| t.entries.len()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn entry(author: u64, text: &str) -> NewEntry {
        NewEntry {
            author_id: UserId(author),
            text: text.to_owned(),
        }
    }

    #[tokio::test]
    async fn add_edge_twice_is_idempotent() {
        let store = MemoryStore::new();
        let edge = FollowEdge::new(UserId(2), UserId(1));
        store.add_edge(edge).await.unwrap();
        let once = store.members(UserId(1)).await.unwrap();
        store.add_edge(edge).await.unwrap();
        let twice = store.members(UserId(1)).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
    }

    #[tokio::test]
    async fn remove_absent_edge_is_noop() {
        let store = MemoryStore::new();
        store
            .remove_edge(FollowEdge::new(UserId(5), UserId(6)))
            .await
            .unwrap();
        assert!(store.members(UserId(6)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_edge_drops_follower() {
        let store = MemoryStore::new();
        store.add_edge(FollowEdge::new(UserId(2), UserId(1))).await.unwrap();
        store.add_edge(FollowEdge::new(UserId(3), UserId(1))).await.unwrap();
        store
            .remove_edge(FollowEdge::new(UserId(2), UserId(1)))
            .await
            .unwrap();
        let members = store.members(UserId(1)).await.unwrap();
        assert_eq!(members.into_iter().collect::<Vec<_>>(), vec![UserId(3)]);
    }

    #[tokio::test]
    async fn top_is_newest_first_and_bounded() {
        let store = MemoryStore::new();
        for text in ["a", "b", "c"] {
            store.append(UserId(1), entry(9, text)).await.unwrap();
        }

        let two = store.top(UserId(1), 2).await.unwrap();
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].text, "c");
        assert_eq!(two[1].text, "b");

        let all = store.top(UserId(1), 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(store.top(UserId(1), 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_user_has_empty_timeline() {
        let store = MemoryStore::new();
        assert!(store.top(UserId(404), 10).await.unwrap().is_empty());
        assert_eq!(store.entry_count(UserId(404)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn capped_timeline_keeps_newest() {
        let store = MemoryStore::with_max_len(2);
        for text in ["a", "b", "c"] {
            store.append(UserId(1), entry(9, text)).await.unwrap();
        }
        let top = store.top(UserId(1), 10).await.unwrap();
        let texts: Vec<_> = top.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["c", "b"]);
        assert_eq!(store.entry_count(UserId(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_appends_lose_nothing() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for author in 0..16_u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.append(UserId(1), entry(author, "post")).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let top = store.top(UserId(1), 100).await.unwrap();
        assert_eq!(top.len(), 16);
        for pair in top.windows(2) {
            assert!(pair[0].received_order > pair[1].received_order);
        }
    }
}
