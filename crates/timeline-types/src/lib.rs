//! Shared type definitions for the timeline service.
//!
//! This crate is the leaf of the dependency graph: every other crate in the
//! workspace speaks in terms of these types. It holds no I/O and no async
//! code.
//!
//! # Modules
//!
//! - [`ids`] -- the [`UserId`] identifier
//! - [`structs`] -- posts, bus events, follow edges, and timeline entries

pub mod ids;
pub mod structs;

pub use ids::{ParseUserIdError, UserId};
pub use structs::{FollowEdge, FollowerSet, NewEntry, Post, PostEvent, TimelineEntry};
