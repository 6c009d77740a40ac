//! Configuration management.
//!
//! One immutable snapshot per process, built at startup from defaults,
//! `SFS_*` environment variables, and command-line flags, then passed by
//! reference through the constructors. There is no mutable global state.

use crate::error::{Result, SharedFsError};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the plugin.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory on the shared filesystem under which all volumes live.
    pub root: PathBuf,

    /// Hostname used in locking operations. Must be stable across restarts
    /// and unique within the cluster.
    pub hostname: String,

    /// Enable verbose logging.
    pub debug: bool,

    /// Period at which this host refreshes its own lock records.
    pub lock_interval: Duration,

    /// Age after which a peer's lock record is considered stale and may be
    /// removed by anyone. Must be strictly greater than `lock_interval`.
    pub lock_timeout: Duration,

    /// Period of the expired-lock / orphan-mount sweep.
    pub cleanup_interval: Duration,

    /// Delay between attempts in the mount slow path. Not exposed through
    /// the environment; tests compress it.
    pub mount_retry_interval: Duration,

    /// `protected` option default for newly created volumes.
    pub default_protected: bool,

    /// `exclusive` option default for newly created volumes.
    pub default_exclusive: bool,
}

impl Config {
    /// Build a configuration with the stock defaults.
    pub fn new(root: impl Into<PathBuf>, hostname: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            hostname: hostname.into(),
            debug: false,
            lock_interval: Duration::from_secs(20),
            lock_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60 * 60),
            mount_retry_interval: Duration::from_secs(5),
            default_protected: false,
            default_exclusive: false,
        }
    }

    /// Apply `SFS_*` environment variable overrides.
    ///
    /// Unset or unparsable variables leave the current value in place.
    pub fn apply_env(&mut self) {
        if let Some(debug) = env_bool("SFS_DEBUG") {
            self.debug = debug;
        }
        if let Some(secs) = env_u64("SFS_LOCK_INTERVAL") {
            self.lock_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("SFS_LOCK_TIMEOUT") {
            self.lock_timeout = Duration::from_secs(secs);
        }
        if let Some(mins) = env_u64("SFS_CLEANUP_INTERVAL") {
            self.cleanup_interval = Duration::from_secs(mins * 60);
        }
        if let Some(protected) = env_bool("SFS_DEFAULT_PROTECTED") {
            self.default_protected = protected;
        }
        if let Some(exclusive) = env_bool("SFS_DEFAULT_EXCLUSIVE") {
            self.default_exclusive = exclusive;
        }
    }

    /// Reject interval combinations that break the keep-alive protocol.
    ///
    /// A lock that times out in less than one refresh period would be
    /// reclaimed by peers while its owner is still alive.
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(SharedFsError::InvalidConfig {
                reason: "root directory is required".to_string(),
            });
        }
        if self.hostname.is_empty() {
            return Err(SharedFsError::InvalidConfig {
                reason: "hostname is required".to_string(),
            });
        }
        if self.lock_interval.is_zero()
            || self.lock_timeout.is_zero()
            || self.cleanup_interval.is_zero()
            || self.mount_retry_interval.is_zero()
        {
            return Err(SharedFsError::InvalidConfig {
                reason: "intervals must be positive".to_string(),
            });
        }
        if self.lock_interval >= self.lock_timeout {
            return Err(SharedFsError::InvalidConfig {
                reason: format!(
                    "lock timeout ({:?}) must be strictly greater than lock interval ({:?})",
                    self.lock_timeout, self.lock_interval
                ),
            });
        }
        Ok(())
    }
}

/// Parse the boolean forms accepted for volume options and `SFS_*` variables:
/// `1/t/T/TRUE/true/True` and `0/f/F/FALSE/false/False`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().as_deref().and_then(parse_bool)
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_bool_forms() {
        for form in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(parse_bool(form), Some(true), "{form}");
        }
        for form in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(parse_bool(form), Some(false), "{form}");
        }
        assert_eq!(parse_bool("yes"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_defaults() {
        let config = Config::new("/mnt/shared", "node-a");
        assert_eq!(config.lock_interval, Duration::from_secs(20));
        assert_eq!(config.lock_timeout, Duration::from_secs(60));
        assert_eq!(config.cleanup_interval, Duration::from_secs(3600));
        assert!(!config.default_protected);
        assert!(!config.default_exclusive);
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("SFS_LOCK_INTERVAL", "2");
        std::env::set_var("SFS_LOCK_TIMEOUT", "7");
        std::env::set_var("SFS_CLEANUP_INTERVAL", "5");
        std::env::set_var("SFS_DEFAULT_EXCLUSIVE", "true");

        let mut config = Config::new("/mnt/shared", "node-a");
        config.apply_env();

        assert_eq!(config.lock_interval, Duration::from_secs(2));
        assert_eq!(config.lock_timeout, Duration::from_secs(7));
        assert_eq!(config.cleanup_interval, Duration::from_secs(300));
        assert!(config.default_exclusive);
        assert!(!config.default_protected);

        std::env::remove_var("SFS_LOCK_INTERVAL");
        std::env::remove_var("SFS_LOCK_TIMEOUT");
        std::env::remove_var("SFS_CLEANUP_INTERVAL");
        std::env::remove_var("SFS_DEFAULT_EXCLUSIVE");
    }

    #[test]
    #[serial]
    fn test_env_garbage_ignored() {
        std::env::set_var("SFS_LOCK_INTERVAL", "soon");
        std::env::set_var("SFS_DEBUG", "maybe");

        let mut config = Config::new("/mnt/shared", "node-a");
        config.apply_env();

        assert_eq!(config.lock_interval, Duration::from_secs(20));
        assert!(!config.debug);

        std::env::remove_var("SFS_LOCK_INTERVAL");
        std::env::remove_var("SFS_DEBUG");
    }

    #[test]
    fn test_interval_must_beat_timeout() {
        let mut config = Config::new("/mnt/shared", "node-a");
        config.lock_interval = Duration::from_secs(60);
        config.lock_timeout = Duration::from_secs(60);
        assert!(config.validate().is_err());

        config.lock_interval = Duration::from_secs(61);
        assert!(config.validate().is_err());

        config.lock_interval = Duration::from_secs(20);
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_intervals_rejected() {
        // SFS_CLEANUP_INTERVAL=0 must not reach the maintenance timers.
        let mut config = Config::new("/mnt/shared", "node-a");
        config.cleanup_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::new("/mnt/shared", "node-a");
        config.mount_retry_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_root_rejected() {
        let config = Config::new("", "node-a");
        assert!(config.validate().is_err());
    }
}
