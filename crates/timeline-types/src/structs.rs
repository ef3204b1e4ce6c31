//! Core records: posts, bus events, follow edges, and timeline entries.

use std::collections::BTreeSet;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Snapshot of the users following a given author.
pub type FollowerSet = BTreeSet<UserId>;

/// A published post. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// The author.
    pub user_id: UserId,
    /// Server timestamp assigned at publish time (whole seconds, UTC).
    pub timestamp: DateTime<Utc>,
    /// Post body.
    pub text: String,
}

impl Post {
    /// Create a post stamped with the current time, truncated to seconds.
    pub fn now(user_id: UserId, text: impl Into<String>) -> Self {
        Self {
            user_id,
            timestamp: Utc::now().trunc_subsecs(0),
            text: text.into(),
        }
    }
}

/// A [`Post`] as carried on the event bus.
///
/// `sequence` is assigned by the bus and strictly increases in publish
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEvent {
    /// Bus sequence number.
    pub sequence: u64,
    /// The published post.
    pub post: Post,
}

/// A follow relationship: `follower_id` follows `followee_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FollowEdge {
    /// The user receiving posts.
    pub follower_id: UserId,
    /// The user being followed.
    pub followee_id: UserId,
}

impl FollowEdge {
    /// Create an edge meaning `follower` follows `followee`.
    pub const fn new(follower: UserId, followee: UserId) -> Self {
        Self {
            follower_id: follower,
            followee_id: followee,
        }
    }
}

/// Entry content handed to the timeline store, before it is ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    /// The post author.
    pub author_id: UserId,
    /// The post body.
    pub text: String,
}

impl NewEntry {
    /// Build the entry a follower receives for `post`.
    pub fn for_post(post: &Post) -> Self {
        Self {
            author_id: post.user_id,
            text: post.text.clone(),
        }
    }

    /// Attach the order assigned by the timeline store.
    pub fn ordered(self, received_order: u64) -> TimelineEntry {
        TimelineEntry {
            author_id: self.author_id,
            text: self.text,
            received_order,
        }
    }
}

/// One post as it sits on one follower's home timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// The post author.
    pub author_id: UserId,
    /// The post body.
    pub text: String,
    /// Arrival order on this timeline; strictly increasing per timeline.
    pub received_order: u64,
}

impl TimelineEntry {
    /// Render the entry as a display line: `"{author_id} - {text}"`.
    pub fn render(&self) -> String {
        format!("{} - {}", self.author_id, self.text)
    }
}
