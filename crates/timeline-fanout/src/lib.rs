//! Fan-out-on-write timeline pipeline.
//!
//! Posting is cheap and reading is cheap because the expensive part, copying
//! each post into every follower's home timeline, happens asynchronously in
//! between:
//!
//! ```text
//! Publisher --> EventBus --> WorkerPool (sharded by author)
//!                                 |
//!                                 +--> FollowerGraph::members(author)
//!                                 +--> TimelineStore::append(follower, entry)
//!                                 +--> DeliveryReport
//!
//! TimelineReader --> TimelineStore::top(user, n)
//! ```
//!
//! - [`Publisher`] stamps a post and enqueues it on the bus.
//! - [`WorkerPool`] runs one [`FanoutWorker`] per shard; a given author's
//!   posts always go to the same shard, so per-author order is kept.
//! - [`TimelineReader`] serves the newest entries of a home timeline.
//! - [`TimelineConfig`] loads the YAML configuration for the service.

pub mod config;
pub mod error;
pub mod pool;
pub mod publisher;
pub mod reader;
pub mod report;
pub mod retry;
pub mod worker;

pub use config::{BusKind, ConfigError, TimelineConfig};
pub use error::FanoutError;
pub use pool::{PoolConfig, PoolHandle, PoolStats, StatsSnapshot, WorkerPool};
pub use publisher::Publisher;
pub use reader::TimelineReader;
pub use report::{DeliveryOutcome, DeliveryReport};
pub use retry::RetryPolicy;
pub use worker::{FanoutWorker, WorkerSettings, WorkerState};
