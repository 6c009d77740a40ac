//! Error types for sharedfs.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sharedfs operations.
pub type Result<T> = std::result::Result<T, SharedFsError>;

/// Main error type for sharedfs.
#[derive(Error, Debug)]
pub enum SharedFsError {
    // Registry errors
    #[error("volume {name} does not exist in the bookkeeping")]
    NotRegistered { name: String },

    // Create-exclusive race outcomes. Handled internally by the driver and
    // the mount slow path; callers outside the crate never see these raw.
    #[error("{path:?} already exists")]
    AlreadyExists { path: PathBuf },

    #[error("{path:?} not found")]
    NotFound { path: PathBuf },

    // Mount protocol errors
    #[error("volume {name} is mounted elsewhere and its holder is still alive")]
    Contended { name: String },

    #[error("volume {name} is already mounted on the same host")]
    AlreadyMountedOnHost { name: String },

    #[error("failed to load mount info for {name}")]
    MountInfoUnreadable {
        name: String,
        #[source]
        source: Box<SharedFsError>,
    },

    // Layout errors
    #[error("{path:?} already exists and it's not a directory")]
    NotADirectory { path: PathBuf },

    // Record format errors
    #[error("invalid timestamp in {path:?}: {reason}")]
    InvalidTimestamp { path: PathBuf, reason: String },

    #[error("invalid record in {path:?}: {source}")]
    InvalidRecord {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // Configuration errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Anything else from the filesystem
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SharedFsError {
    /// Wrap an `std::io::Error`, classifying the outcomes the coordination
    /// protocol branches on (create-exclusive loss, missing file).
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// True if this is the losing side of a create-exclusive race.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// True if the underlying file was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
