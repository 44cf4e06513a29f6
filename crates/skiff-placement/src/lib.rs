//! Skiff placement: tracks cluster nodes and ranks them for placement.
//!
//! This crate does not place anything itself. It keeps the session's
//! view of node stats current and produces orderings that the caller
//! uses to pick where a container should go.
//!
//! # Components
//!
//! - **`ranker`**: Stable, descending ordering by one stat
//! - **`registry`**: Node set with a lazily recomputed ranking cache

pub mod ranker;
pub mod registry;

pub use ranker::{Node, rank_nodes};
pub use registry::NodeRegistry;
