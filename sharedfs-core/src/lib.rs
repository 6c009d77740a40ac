//! sharedfs core library
//!
//! Cluster-wide volume coordination over a shared filesystem. Hosts
//! coordinate exclusively through files under each volume's `_locks/`
//! directory: per-host keep-alive records announce liveness, per-mount
//! registrations announce usage, and create-exclusive writes arbitrate every
//! cross-host race.

pub mod config;
pub mod driver;
pub mod error;
pub mod lock;
pub mod maintenance;
pub mod metadata;
pub mod mount;
pub mod paths;
pub mod volume;

// Re-export commonly used items
pub use config::Config;
pub use driver::{Capability, Driver, VolumeInfo, VolumeStatus, VolumeSummary};
pub use error::{Result, SharedFsError};
pub use maintenance::Maintenance;
pub use paths::VolumeLayout;
pub use volume::Volume;
