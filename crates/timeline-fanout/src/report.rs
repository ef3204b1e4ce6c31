//! Per-post delivery records.
//!
//! Every post a worker processes yields exactly one [`DeliveryReport`].
//! Anything short of [`DeliveryOutcome::Delivered`] is the explicit record
//! that a post did not reach everyone.

use serde::Serialize;
use timeline_types::{PostEvent, UserId};

/// How far a post got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Every follower received the entry.
    Delivered,
    /// Some followers exhausted their write retries.
    PartiallyDelivered,
    /// Nothing was written: the follower set could not be resolved, or the
    /// pool stopped before the post was fanned out.
    Undelivered,
}

/// Result of fanning out one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Bus sequence number of the post.
    pub sequence: u64,
    /// The post author.
    pub author_id: UserId,
    /// Size of the resolved follower set.
    pub followers: usize,
    /// Followers whose timeline received the entry.
    pub delivered: usize,
    /// Followers that exhausted retries without receiving the entry.
    pub failed: Vec<UserId>,
    /// Attempts spent resolving the follower set.
    pub resolution_attempts: u32,
    /// Overall outcome.
    pub outcome: DeliveryOutcome,
    /// Last error seen, if the outcome is not `Delivered`.
    pub error: Option<String>,
}

impl DeliveryReport {
    /// Report for a post that wrote no entries.
    pub fn undelivered(event: &PostEvent, resolution_attempts: u32, error: String) -> Self {
        Self {
            sequence: event.sequence,
            author_id: event.post.user_id,
            followers: 0,
            delivered: 0,
            failed: Vec::new(),
            resolution_attempts,
            outcome: DeliveryOutcome::Undelivered,
            error: Some(error),
        }
    }

    /// Report for a post that went through the write phase.
    pub fn written(
        event: &PostEvent,
        resolution_attempts: u32,
        followers: usize,
        failed: Vec<UserId>,
        error: Option<String>,
    ) -> Self {
        let outcome = if failed.is_empty() {
            DeliveryOutcome::Delivered
        } else {
            DeliveryOutcome::PartiallyDelivered
        };
        Self {
            sequence: event.sequence,
            author_id: event.post.user_id,
            followers,
            delivered: followers.saturating_sub(failed.len()),
            failed,
            resolution_attempts,
            outcome,
            error: if outcome == DeliveryOutcome::Delivered { None } else { error },
        }
    }

    /// Whether every follower received the entry.
    pub fn is_complete(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }
}
