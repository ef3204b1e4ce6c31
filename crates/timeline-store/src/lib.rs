//! Storage layer for the timeline service.
//!
//! Two leaf components live here, each as a trait with two backends:
//!
//! ```text
//! FollowerGraph   followers:{user}         (set)   SADD / SREM / SMEMBERS
//! TimelineStore   timeline:{user}          (list)  LPUSH / LRANGE / LTRIM
//!                 timeline:{user}:seq      (int)   INCR
//! ```
//!
//! The only mutation contract either trait offers is per-user atomicity.
//! Nothing here spans keys, which is what lets fan-out writes run in
//! parallel without coordination.
//!
//! # Modules
//!
//! - [`graph`] -- the [`FollowerGraph`] trait
//! - [`timeline`] -- the [`TimelineStore`] trait
//! - [`memory`] -- in-process backend implementing both
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) backend implementing both
//! - [`error`] -- shared error type

pub mod dragonfly;
pub mod error;
pub mod graph;
pub mod memory;
pub mod timeline;

pub use dragonfly::DragonflyStore;
pub use error::StoreError;
pub use graph::FollowerGraph;
pub use memory::MemoryStore;
pub use timeline::TimelineStore;
