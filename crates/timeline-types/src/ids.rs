//! User identifier.
//!
//! Users are keyed by the integer IDs found in the relationship and post
//! source data. The newtype keeps them from being mixed up with sequence
//! numbers and `received_order` values, which are also `u64`.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique identifier for a user (author, follower, or followee).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    /// Create an identifier from its raw integer value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Return the inner integer value.
    pub const fn into_inner(self) -> u64 {
        self.0
    }

    /// Return the worker shard that owns this user's posts.
    ///
    /// With `total_shards <= 1` every user belongs to shard 0.
    pub fn shard(self, total_shards: u32) -> u32 {
        if total_shards <= 1 {
            return 0;
        }
        // Remainder is strictly below `total_shards`, so it fits in u32.
        let rem = self.0.checked_rem(u64::from(total_shards)).unwrap_or(0);
        u32::try_from(rem).unwrap_or(0)
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<UserId> for u64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Error returned when a string is not a valid [`UserId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseUserIdError(String);

impl core::fmt::Display for ParseUserIdError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "invalid user id: {:?}", self.0)
    }
}

impl std::error::Error for ParseUserIdError {}

impl FromStr for UserId {
    type Err = ParseUserIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| ParseUserIdError(s.to_owned()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_integers() {
        assert_eq!("42".parse::<UserId>().unwrap(), UserId(42));
        assert_eq!(" 7 ".parse::<UserId>().unwrap(), UserId(7));
    }

    #[test]
    fn rejects_non_numeric() {
        assert!("abc".parse::<UserId>().is_err());
        assert!("-1".parse::<UserId>().is_err());
        assert!("".parse::<UserId>().is_err());
    }

    #[test]
    fn serializes_as_bare_integer() {
        let json = serde_json::to_string(&UserId(99)).unwrap();
        assert_eq!(json, "99");
    }

    #[test]
    fn single_shard_owns_everyone() {
        assert_eq!(UserId(12345).shard(1), 0);
        assert_eq!(UserId(12345).shard(0), 0);
    }

    #[test]
    fn every_user_maps_to_exactly_one_shard() {
        let total = 4;
        for raw in 0..64 {
            let shard = UserId(raw).shard(total);
            assert!(shard < total);
            assert_eq!(shard, UserId(raw).shard(total), "assignment is stable");
        }
    }
}
