//! Volume handles.
//!
//! `async` volumes let write durability trail the logical state by a few
//! seconds. The on-disk structure is never at risk, and they are much
//! faster than synchronous ones.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::info;

use skiff_core::{Command, Error, OwnerId, Result, Transport, TransportSlot};

/// Handle to a remote volume.
///
/// Holds only a weak link to the session connection: a handle must not
/// keep a session alive, and once the session is torn down every
/// operation fails with [`Error::Disconnected`].
#[derive(Clone)]
pub struct Volume {
    owner: OwnerId,
    uuid: String,
    tag: Option<String>,
    async_writes: bool,
    link: Weak<TransportSlot>,
}

impl Volume {
    pub fn new(
        owner: OwnerId,
        uuid: String,
        tag: Option<String>,
        async_writes: bool,
        link: Weak<TransportSlot>,
    ) -> Self {
        Self {
            owner,
            uuid,
            tag,
            async_writes,
            link,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn async_writes(&self) -> bool {
        self.async_writes
    }

    /// Tag if there is one, otherwise the uuid.
    pub fn display_name(&self) -> &str {
        self.tag.as_deref().unwrap_or(&self.uuid)
    }

    /// Whether `key` names this volume, by uuid or by tag.
    pub fn matches(&self, key: &str) -> bool {
        self.uuid == key || self.tag.as_deref() == Some(key)
    }

    /// Mark the current state of the volume as its rollback baseline.
    pub fn snapshot(&self) -> Result<()> {
        self.transport()?.send(Command::SnapshotVolume {
            volume: self.uuid.clone(),
        })?;
        info!(volume = %self.uuid, "set snapshot for volume");
        Ok(())
    }

    /// Restore the volume to its last snapshot.
    pub fn rollback(&self) -> Result<()> {
        self.transport()?.send(Command::RollbackVolume {
            volume: self.uuid.clone(),
        })?;
        info!(volume = %self.uuid, "rolled back to snapshot");
        Ok(())
    }

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.link.upgrade().ok_or(Error::Disconnected)?.get()
    }
}

impl PartialEq for Volume {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.uuid == other.uuid
    }
}

impl Eq for Volume {}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("uuid", &self.uuid)
            .field("tag", &self.tag)
            .field("async_writes", &self.async_writes)
            .finish()
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
