//! Skiff volumes: remote, snapshot-capable storage.
//!
//! Volumes live on the location; the client holds handles to them. A
//! handle can snapshot or roll back its volume for as long as the
//! session that produced it is connected.
//!
//! # Components
//!
//! - **`volume`**: Volume handles (snapshot, rollback)
//! - **`registry`**: The session's volume set, unique by uuid and owner-scoped tag
//! - **`tag`**: Tag validation, applied before any create is sent
//! - **`mount`**: Lexical mount-path conflict checks and mount plans

pub mod mount;
pub mod registry;
pub mod tag;
pub mod volume;

pub use mount::{MountConflict, MountPlan, normalize, trees_intersect};
pub use registry::VolumeRegistry;
pub use tag::validate_tag;
pub use volume::Volume;
