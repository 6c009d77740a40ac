//! Per-host keep-alive records.
//!
//! A file `_locks/<host>.lock` whose content is an RFC3339 UTC timestamp
//! announces that `<host>` is still using the volume. As long as any host
//! keeps its record fresh, no peer will delete the volume's data. The
//! timestamp content is the source of truth; filesystem mtimes are never
//! consulted since shared filesystems don't report them reliably.

use crate::error::{Result, SharedFsError};
use crate::paths::{VolumeLayout, LOCK_EXT};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// A parsed `_locks/<host>.lock` record.
#[derive(Debug, Clone)]
pub struct LockRecord {
    path: PathBuf,
    hostname: String,
    locked_at: DateTime<Utc>,
}

impl LockRecord {
    /// Write (create or truncate) the keep-alive record for `host` with the
    /// current UTC time. Called on volume creation and by the maintenance
    /// loop every lock interval.
    pub fn refresh(layout: &VolumeLayout, host: &str) -> Result<()> {
        let path = layout.lock_file(host);
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| SharedFsError::io(&path, e))?;

        file.write_all(now.as_bytes()).map_err(|e| SharedFsError::io(&path, e))
    }

    /// Read the record for `host`, `None` if it does not exist.
    pub fn read(layout: &VolumeLayout, host: &str) -> Result<Option<LockRecord>> {
        let path = layout.lock_file(host);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SharedFsError::io(&path, e)),
        };

        let locked_at = DateTime::parse_from_rfc3339(content.trim())
            .map_err(|e| SharedFsError::InvalidTimestamp {
                path: path.clone(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(Some(LockRecord { path, hostname: host.to_string(), locked_at }))
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn locked_at(&self) -> DateTime<Utc> {
        self.locked_at
    }

    /// Time since the last refresh. A timestamp in the future (clock skew)
    /// counts as age zero.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.locked_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Remove the record if it has outlived `timeout`.
    ///
    /// Returns `true` if the record was stale and has been unlinked.
    pub fn try_expire(&self, timeout: Duration) -> Result<bool> {
        if self.age() < timeout {
            return Ok(false);
        }
        self.remove()?;
        Ok(true)
    }

    /// Unlink the record. Losing an unlink race to a peer is not an error.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SharedFsError::io(&self.path, e)),
        }
    }
}

/// True if any host currently holds a keep-alive record on the volume.
pub fn is_locked(layout: &VolumeLayout) -> Result<bool> {
    let dir = layout.locks_dir();
    let entries = std::fs::read_dir(&dir).map_err(|e| SharedFsError::io(&dir, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| SharedFsError::io(&dir, e))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == LOCK_EXT) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Enumerate all keep-alive records, keyed by hostname.
///
/// Records that cannot be read or parsed are logged and skipped so a single
/// corrupt file does not hide the rest.
pub fn list_locks(layout: &VolumeLayout) -> Result<HashMap<String, LockRecord>> {
    let dir = layout.locks_dir();
    let entries = std::fs::read_dir(&dir).map_err(|e| SharedFsError::io(&dir, e))?;

    let mut locks = HashMap::new();

    for entry in entries {
        let entry = entry.map_err(|e| SharedFsError::io(&dir, e))?;
        let path = entry.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != LOCK_EXT) {
            continue;
        }

        let Some(host) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        match LockRecord::read(layout, host) {
            Ok(Some(lock)) => {
                locks.insert(host.to_string(), lock);
            }
            Ok(None) => {}
            Err(e) => warn!("failed to read lock file for {}: {}", host, e),
        }
    }

    Ok(locks)
}
