//! Volume registry.
//!
//! Uuids are unique across the registry; tags are unique per owner.

use tracing::warn;

use skiff_core::{Error, Result};

use crate::volume::Volume;

/// The session's known volumes, in arrival order.
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    volumes: Vec<Volume>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set (resource offer). Entries that would break
    /// tag uniqueness are skipped.
    pub fn replace(&mut self, volumes: impl IntoIterator<Item = Volume>) {
        self.volumes.clear();
        for volume in volumes {
            if let Err(e) = self.insert(volume) {
                warn!(error = %e, "skipping volume from resource offer");
            }
        }
    }

    /// Add a volume, replacing any entry with the same uuid.
    pub fn insert(&mut self, volume: Volume) -> Result<()> {
        if let Some(tag) = volume.tag() {
            let clash = self.volumes.iter().any(|v| {
                v.uuid() != volume.uuid() && v.owner() == volume.owner() && v.tag() == Some(tag)
            });
            if clash {
                return Err(Error::Validation(format!(
                    "tag '{tag}' is already used by another volume"
                )));
            }
        }

        match self.volumes.iter().position(|v| v.uuid() == volume.uuid()) {
            Some(i) => self.volumes[i] = volume,
            None => self.volumes.push(volume),
        }
        Ok(())
    }

    pub fn remove(&mut self, uuid: &str) -> Option<Volume> {
        let i = self.volumes.iter().position(|v| v.uuid() == uuid)?;
        Some(self.volumes.remove(i))
    }

    /// Look a volume up by uuid or tag within `owner`'s volumes.
    pub fn get(&self, owner: &str, key: &str) -> Result<Volume> {
        self.volumes
            .iter()
            .find(|v| v.owner() == owner && v.matches(key))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no volume with uuid or tag '{key}'")))
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.volumes.iter().any(|v| v.uuid() == uuid)
    }

    pub fn tag_taken(&self, owner: &str, tag: &str) -> bool {
        self.volumes
            .iter()
            .any(|v| v.owner() == owner && v.tag() == Some(tag))
    }

    pub fn all(&self) -> Vec<Volume> {
        self.volumes.clone()
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn clear(&mut self) {
        self.volumes.clear();
    }
}
