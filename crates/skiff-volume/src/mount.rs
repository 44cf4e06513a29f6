//! Mount path conflict detection.
//!
//! Two volumes may not be mounted so that one shadows the other: no
//! claimed mountpoint may be an ancestor, descendant, or duplicate of
//! another. The check is lexical on normalized absolute paths and never
//! touches the filesystem.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use skiff_core::{Error, Result};

/// Two mountpoints where `subtree` lies inside (or equals) `supertree`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConflict {
    pub subtree: PathBuf,
    pub supertree: PathBuf,
}

impl fmt::Display for MountConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is a subtree of {}",
            self.subtree.display(),
            self.supertree.display()
        )
    }
}

/// Absolute, lexically normal form of `path`.
///
/// Relative paths are taken from the current directory. `.` segments,
/// repeated separators and trailing separators disappear; `..` removes
/// the previous segment without consulting the filesystem.
pub fn normalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(segment) => out.push(segment),
        }
    }
    Ok(out)
}

/// Find the first claimed path that conflicts with `proposed`.
///
/// Containment is judged per path component, so `/data/a` and
/// `/data/ab` do not conflict. A character-prefix comparison would
/// report them as overlapping; this check does not.
pub fn trees_intersect<I, P>(current: I, proposed: impl AsRef<Path>) -> Result<Option<MountConflict>>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let proposed = normalize(proposed)?;
    for claimed in current {
        let claimed = normalize(claimed)?;
        if proposed.starts_with(&claimed) {
            return Ok(Some(MountConflict {
                subtree: proposed,
                supertree: claimed,
            }));
        }
        if claimed.starts_with(&proposed) {
            return Ok(Some(MountConflict {
                subtree: claimed,
                supertree: proposed,
            }));
        }
    }
    Ok(None)
}

/// An ordered set of `(volume, mountpoint)` pairs with no conflicts.
#[derive(Debug, Clone)]
pub struct MountPlan<V> {
    mounts: Vec<(V, PathBuf)>,
}

impl<V> MountPlan<V> {
    pub fn new() -> Self {
        Self { mounts: Vec::new() }
    }

    /// Claim `mountpoint` for `volume`, refusing it if it would shadow
    /// or be shadowed by an earlier claim.
    pub fn add(&mut self, volume: V, mountpoint: impl AsRef<Path>) -> Result<()> {
        let claimed = self.mounts.iter().map(|(_, path)| path);
        if let Some(conflict) = trees_intersect(claimed, mountpoint.as_ref())? {
            return Err(Error::Validation(format!("mount conflict: {conflict}")));
        }
        self.mounts.push((volume, normalize(mountpoint)?));
        Ok(())
    }

    pub fn mounts(&self) -> &[(V, PathBuf)] {
        &self.mounts
    }

    pub fn mountpoints(&self) -> impl Iterator<Item = &Path> {
        self.mounts.iter().map(|(_, path)| path.as_path())
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    pub fn into_mounts(self) -> Vec<(V, PathBuf)> {
        self.mounts
    }
}

impl<V> Default for MountPlan<V> {
    fn default() -> Self {
        Self::new()
    }
}
