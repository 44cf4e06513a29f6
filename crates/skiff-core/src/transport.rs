//! Transport abstraction for the session connection.
//!
//! The session never touches sockets directly. A [`Connector`] produces
//! a [`Connection`]: a [`Transport`] for outbound commands and a channel
//! of inbound push events. Tests inject in-memory implementations.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::message::{Command, PushEvent, Reply};

/// Boxed, sendable future used by the object-safe traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outbound half of a session connection.
pub trait Transport: Send + Sync {
    /// Send a command and wait for its reply.
    ///
    /// A remote rejection surfaces as [`Error::Remote`] carrying the
    /// location's reason.
    fn request(&self, command: Command) -> BoxFuture<'_, Result<Reply>>;

    /// Send a command without waiting for any reply.
    fn send(&self, command: Command) -> Result<()>;

    /// Close the connection. Safe to call more than once.
    fn close(&self);
}

/// An established connection to a location.
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<PushEvent>,
}

/// Establishes connections to a location.
pub trait Connector: Send + Sync {
    /// Connect to the location at `location` (usually `host:port`).
    ///
    /// Fails with [`Error::Connectivity`] when the location cannot be
    /// reached.
    fn connect<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Connection>>;
}

/// Shared, clearable handle to a session's transport.
///
/// The session owns the slot; volumes hold a `Weak` to it. Taking the
/// transport out marks the session as torn down, and every later `get`
/// fails with [`Error::Disconnected`].
#[derive(Default)]
pub struct TransportSlot {
    transport: RwLock<Option<Arc<dyn Transport>>>,
}

impl TransportSlot {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport: RwLock::new(Some(transport)),
        }
    }

    /// The live transport, or `Disconnected` after teardown.
    pub fn get(&self) -> Result<Arc<dyn Transport>> {
        self.transport
            .read()
            .expect("transport lock")
            .clone()
            .ok_or(Error::Disconnected)
    }

    /// Remove the transport. Only the first call returns it.
    pub fn take(&self) -> Option<Arc<dyn Transport>> {
        self.transport.write().expect("transport lock").take()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.read().expect("transport lock").is_some()
    }
}
