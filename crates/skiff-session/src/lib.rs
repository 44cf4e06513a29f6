//! skiff-session: the client side of one location.
//!
//! [`ClusterSession`] owns the connection and every registry fed by it.
//! A single event-loop task decodes push events and applies them one at
//! a time; caller operations share the same state behind one lock, so a
//! blocking command can wait on its reply while unrelated pushes keep
//! flowing.
//!
//! # Components
//!
//! - **`session`**: `ClusterSession`: connect, readiness gate, dispatch, teardown
//! - **`config`**: `SessionConfig` loaded from TOML
//! - **`heartbeat`**: Keepalive pacing on idle ticks
//! - **`container`**: `Container` handles the session can tunnel onto
//! - **`image`**: `ImageResolver` seam for layer upload

pub mod config;
pub mod container;
pub mod heartbeat;
pub mod image;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::SessionConfig;
pub use container::{Container, ExternalContainer};
pub use heartbeat::Heartbeat;
pub use image::ImageResolver;
pub use session::ClusterSession;
