//! Error types shared by every Skiff crate.

use thiserror::Error;

/// Result type alias for location operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a location.
///
/// Stale proxy traffic and stats for unknown nodes are not errors: the
/// session logs and drops them.
#[derive(Debug, Error)]
pub enum Error {
    /// The location cannot be reached at all.
    #[error("cannot reach location: {0}")]
    Connectivity(String),

    /// A readiness wait or a blocking command ran out of time.
    #[error("timed out: {0}")]
    ProtocolTimeout(String),

    /// Rejected locally, before anything was sent.
    #[error("invalid: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The location refused the command.
    #[error("rejected by location: {0}")]
    Remote(String),

    #[error("location has not sent a resource offer yet")]
    NotReady,

    #[error("session is disconnected")]
    Disconnected,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
