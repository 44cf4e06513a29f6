//! skiff-core: shared types for the Skiff location client.
//!
//! Everything that crosses a crate boundary lives here: the error
//! taxonomy, the wire vocabulary spoken with the location broker, and
//! the traits that abstract the session transport.
//!
//! # Architecture
//!
//! ```text
//! Connector ──connect()──▶ Connection
//!                            ├── Arc<dyn Transport>   (commands out, replies back)
//!                            └── mpsc::UnboundedReceiver<PushEvent>  (server pushes)
//! ```
//!
//! Commands and push events are closed, serde-tagged enums: a frame is
//! decoded once and dispatched with a single `match`.

pub mod error;
pub mod line;
pub mod message;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use line::{Frame, LineConnector, LineTransport};
pub use message::{Command, PushEvent, Reply};
pub use transport::{BoxFuture, Connection, Connector, Transport, TransportSlot};
pub use types::*;
