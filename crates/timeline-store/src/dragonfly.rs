//! `Dragonfly` (Redis-compatible) backend for both stores.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `followers:{id}` | Set | User IDs following `{id}` |
//! | `timeline:{id}` | List | `"{order} {json}"` values, newest at index 0 |
//! | `timeline:{id}:seq` | Integer | Last `received_order` handed out on `{id}` |
//!
//! Appends run as one Lua script so the order counter and the list push
//! happen atomically; two fan-outs racing onto one timeline can never land
//! out of order.

use fred::prelude::*;
use timeline_types::{FollowEdge, FollowerSet, NewEntry, TimelineEntry, UserId};

use crate::error::StoreError;
use crate::graph::FollowerGraph;
use crate::timeline::TimelineStore;

/// KEYS[1] = timeline list, KEYS[2] = order counter,
/// ARGV[1] = entry JSON, ARGV[2] = cap (0 = unbounded).
const APPEND_SCRIPT: &str = r"
local order = redis.call('INCR', KEYS[2])
redis.call('LPUSH', KEYS[1], order .. ' ' .. ARGV[1])
local cap = tonumber(ARGV[2])
if cap > 0 then
  redis.call('LTRIM', KEYS[1], 0, cap - 1)
end
return order
";

fn followers_key(user: UserId) -> String {
    format!("followers:{user}")
}

fn timeline_key(user: UserId) -> String {
    format!("timeline:{user}")
}

fn order_key(user: UserId) -> String {
    format!("timeline:{user}:seq")
}

/// Decode one stored list value (`"{order} {json}"`).
fn decode_entry(key: &str, raw: &str) -> Result<TimelineEntry, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_owned(),
        reason,
    };
    let (order, json) = raw
        .split_once(' ')
        .ok_or_else(|| corrupt(format!("missing order prefix in {raw:?}")))?;
    let order: u64 = order
        .parse()
        .map_err(|e| corrupt(format!("bad order {order:?}: {e}")))?;
    let entry: NewEntry = serde_json::from_str(json)?;
    Ok(entry.ordered(order))
}

/// Connection handle to a `Dragonfly` instance holding follower sets and
/// timelines.
#[derive(Clone)]
pub struct DragonflyStore {
    client: Client,
    max_len: usize,
}

impl DragonflyStore {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL follows the Redis scheme: `redis://host:port` or
    /// `redis://host:port/db`. `max_len == 0` keeps timelines unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    /// Returns [`StoreError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str, max_len: usize) -> Result<Self, StoreError> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!(max_len, "Connected to Dragonfly");
        Ok(Self { client, max_len })
    }

    /// Flush all keys from the `Dragonfly` instance.
    ///
    /// **WARNING:** This deletes all data. Only use for testing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Dragonfly`] if the flush fails.
    pub async fn flush_all(&self) -> Result<(), StoreError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }

    /// Return a reference to the underlying [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

impl std::fmt::Debug for DragonflyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DragonflyStore")
            .field("max_len", &self.max_len)
            .finish_non_exhaustive()
    }
}

impl FollowerGraph for DragonflyStore {
    async fn add_edge(&self, edge: FollowEdge) -> Result<(), StoreError> {
        let key = followers_key(edge.followee_id);
        let _: u32 = self
            .client
            .sadd(key.as_str(), edge.follower_id.to_string())
            .await?;
        Ok(())
    }

    async fn remove_edge(&self, edge: FollowEdge) -> Result<(), StoreError> {
        let key = followers_key(edge.followee_id);
        let _: u32 = self
            .client
            .srem(key.as_str(), edge.follower_id.to_string())
            .await?;
        Ok(())
    }

    async fn members(&self, followee: UserId) -> Result<FollowerSet, StoreError> {
        let key = followers_key(followee);
        let raw: Vec<String> = self.client.smembers(key.as_str()).await?;
        raw.iter()
            .map(|m| {
                m.parse::<UserId>().map_err(|e| StoreError::Corrupt {
                    key: key.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

impl TimelineStore for DragonflyStore {
    async fn append(&self, user: UserId, entry: NewEntry) -> Result<TimelineEntry, StoreError> {
        let json = serde_json::to_string(&entry)?;
        let keys = vec![timeline_key(user), order_key(user)];
        let args = vec![json, self.max_len.to_string()];

        let order: i64 = self.client.eval(APPEND_SCRIPT, keys, args).await?;
        let order = u64::try_from(order).map_err(|e| StoreError::Corrupt {
            key: order_key(user),
            reason: format!("negative order {order}: {e}"),
        })?;
        Ok(entry.ordered(order))
    }

    async fn top(&self, user: UserId, n: usize) -> Result<Vec<TimelineEntry>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let key = timeline_key(user);
        let stop = i64::try_from(n).unwrap_or(i64::MAX).saturating_sub(1);
        let values: Vec<String> = self.client.lrange(key.as_str(), 0, stop).await?;

        let mut entries = Vec::with_capacity(values.len());
        for v in &values {
            entries.push(decode_entry(&key, v)?);
        }
        Ok(entries)
    }

    async fn entry_count(&self, user: UserId) -> Result<usize, StoreError> {
        let len: u64 = self.client.llen(timeline_key(user)).await?;
        Ok(usize::try_from(len).unwrap_or(usize::MAX))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(followers_key(UserId(7)), "followers:7");
        assert_eq!(timeline_key(UserId(7)), "timeline:7");
        assert_eq!(order_key(UserId(7)), "timeline:7:seq");
    }

    #[test]
    fn decodes_stored_value() {
        let entry = decode_entry(
            "timeline:1",
            r#"12 {"author_id":3,"text":"hello world"}"#,
        )
        .unwrap();
        assert_eq!(entry.received_order, 12);
        assert_eq!(entry.author_id, UserId(3));
        assert_eq!(entry.text, "hello world");
    }

    #[test]
    fn rejects_value_without_order() {
        let err = decode_entry("timeline:1", r#"{"author_id":3,"text":"x"}"#).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn rejects_bad_json() {
        let err = decode_entry("timeline:1", "4 not-json").unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
