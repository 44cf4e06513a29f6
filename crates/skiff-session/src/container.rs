//! Container handles.
//!
//! Running containers are managed outside this crate; the session only
//! needs to know where one lives and when it can accept connections.

use std::net::IpAddr;
use std::time::Duration;

use skiff_core::{BoxFuture, ContainerRef, Result};

/// A container the session can tunnel onto.
pub trait Container: Send + Sync {
    fn reference(&self) -> ContainerRef;

    /// Resolve once the container is running and addressable. Fails
    /// with [`skiff_core::Error::ProtocolTimeout`] after `timeout`.
    fn wait_until_ready(&self, timeout: Duration) -> BoxFuture<'_, Result<()>>;

    /// The container's address on the location's network, once ready.
    fn address(&self) -> Option<IpAddr>;
}

/// A container started by some other session and advertised by tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalContainer {
    reference: ContainerRef,
    address: IpAddr,
}

impl ExternalContainer {
    pub fn new(reference: ContainerRef, address: IpAddr) -> Self {
        Self { reference, address }
    }

    pub fn uuid(&self) -> &str {
        &self.reference.uuid
    }

    pub fn node(&self) -> &str {
        &self.reference.node
    }
}

impl Container for ExternalContainer {
    fn reference(&self) -> ContainerRef {
        self.reference.clone()
    }

    // Found by tag, so already running.
    fn wait_until_ready(&self, _timeout: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn address(&self) -> Option<IpAddr> {
        Some(self.address)
    }
}
