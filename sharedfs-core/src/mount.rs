//! Per-mount registration records.
//!
//! A file `_locks/<id>.mount` (or `_locks/exclusive.mount` on exclusive
//! volumes) registers one active container mount. Creation uses
//! `O_CREAT|O_EXCL`, which is the only cross-host arbiter: whichever host's
//! create returns success owns the mount; everyone else sees the existing
//! record and must go through the slow path in [`crate::volume`].

use crate::error::{Result, SharedFsError};
use crate::paths::{VolumeLayout, MOUNT_EXT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One mount registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountRecord {
    #[serde(skip)]
    path: PathBuf,

    #[serde(rename = "MountID")]
    mount_id: String,

    #[serde(rename = "Hostname")]
    hostname: String,
}

impl MountRecord {
    /// A record for `id` owned by `host`, not yet on disk.
    pub fn new(layout: &VolumeLayout, id: &str, host: &str, exclusive: bool) -> Self {
        Self {
            path: layout.mount_file(id, exclusive),
            mount_id: id.to_string(),
            hostname: host.to_string(),
        }
    }

    pub fn mount_id(&self) -> &str {
        &self.mount_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Create-exclusive write of the record.
    ///
    /// `AlreadyExists` means another mount (possibly on another host) holds
    /// the registration. A partially written record is unlinked before the
    /// error is returned, so peers never parse a torn file.
    pub fn acquire(&self) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)
            .map_err(|e| SharedFsError::InvalidRecord { path: self.path.clone(), source: e })?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&self.path)
            .map_err(|e| SharedFsError::io(&self.path, e))?;

        if let Err(e) = file.write_all(&content) {
            let _ = std::fs::remove_file(&self.path);
            return Err(SharedFsError::io(&self.path, e));
        }

        Ok(())
    }

    /// Read the registration for `id`, `None` if nobody holds it.
    pub fn load(layout: &VolumeLayout, id: &str, exclusive: bool) -> Result<Option<MountRecord>> {
        Self::load_path(&layout.mount_file(id, exclusive))
    }

    fn load_path(path: &Path) -> Result<Option<MountRecord>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SharedFsError::io(path, e)),
        };

        let mut record: MountRecord = serde_json::from_str(&content)
            .map_err(|e| SharedFsError::InvalidRecord { path: path.to_path_buf(), source: e })?;
        record.path = path.to_path_buf();

        Ok(Some(record))
    }

    /// Unlink the registration. Already-gone records are not an error.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SharedFsError::io(&self.path, e)),
        }
    }
}

/// Enumerate all mount registrations, keyed by record filename stem.
///
/// Unreadable records are logged and skipped.
pub fn list_mounts(layout: &VolumeLayout) -> Result<HashMap<String, MountRecord>> {
    let dir = layout.locks_dir();
    let entries = std::fs::read_dir(&dir).map_err(|e| SharedFsError::io(&dir, e))?;

    let mut mounts = HashMap::new();

    for entry in entries {
        let entry = entry.map_err(|e| SharedFsError::io(&dir, e))?;
        let path = entry.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != MOUNT_EXT) {
            continue;
        }

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        match MountRecord::load_path(&path) {
            Ok(Some(record)) => {
                mounts.insert(stem.to_string(), record);
            }
            Ok(None) => {}
            Err(e) => warn!("failed to read mount file for {}: {}", stem, e),
        }
    }

    Ok(mounts)
}
