//! Per-volume path layout.
//!
//! All coordination paths go through this module so that every host maps the
//! same volume name to the same files on the shared filesystem.
//!
//! The layout under the root is:
//!
//! ```text
//! <root>/<name>
//! ├── _data/               # exposed to the container runtime
//! ├── _locks/
//! │   ├── <host>.lock      # keep-alive record, RFC3339 timestamp
//! │   ├── <id>.mount       # mount registration (non-exclusive)
//! │   └── exclusive.mount  # mount registration (exclusive volumes)
//! └── meta.json            # volume attributes, write-once
//! ```

use std::path::{Path, PathBuf};

/// Extension of keep-alive records under `_locks/`.
pub const LOCK_EXT: &str = "lock";

/// Extension of mount registrations under `_locks/`.
pub const MOUNT_EXT: &str = "mount";

/// The single mount-record basename used by exclusive volumes.
pub const EXCLUSIVE_MOUNT_FILE: &str = "exclusive.mount";

/// Pure path mapping for one volume directory. No I/O.
#[derive(Debug, Clone)]
pub struct VolumeLayout {
    mountpoint: PathBuf,
}

impl VolumeLayout {
    pub fn new(root: &Path, name: &str) -> Self {
        Self { mountpoint: root.join(name) }
    }

    /// The volume directory itself, `<root>/<name>`.
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// The directory handed to the container runtime.
    pub fn data_dir(&self) -> PathBuf {
        self.mountpoint.join("_data")
    }

    /// The coordination directory.
    pub fn locks_dir(&self) -> PathBuf {
        self.mountpoint.join("_locks")
    }

    /// The write-once volume attributes file.
    pub fn meta_file(&self) -> PathBuf {
        self.mountpoint.join("meta.json")
    }

    /// The keep-alive record for `host`.
    pub fn lock_file(&self, host: &str) -> PathBuf {
        self.locks_dir().join(format!("{}.{}", host, LOCK_EXT))
    }

    /// The mount registration for `id`.
    ///
    /// Exclusive volumes collapse every id onto `exclusive.mount`, which is
    /// what enforces the at-most-one-mount semantics cluster-wide.
    pub fn mount_file(&self, id: &str, exclusive: bool) -> PathBuf {
        if exclusive {
            self.locks_dir().join(EXCLUSIVE_MOUNT_FILE)
        } else {
            self.locks_dir().join(format!("{}.{}", id, MOUNT_EXT))
        }
    }
}
