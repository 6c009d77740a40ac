//! One named volume on the shared filesystem.
//!
//! Aggregates the metadata, keep-alive, and mount-registration records for a
//! single volume directory, including the slow-path acquisition that runs
//! when a mount is contended across hosts.

use crate::config::{parse_bool, Config};
use crate::error::{Result, SharedFsError};
use crate::lock::{self, LockRecord};
use crate::metadata::{self, VolumeMeta};
use crate::mount::{self, MountRecord};
use crate::paths::VolumeLayout;
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A single volume instance.
#[derive(Debug, Clone)]
pub struct Volume {
    name: String,
    layout: VolumeLayout,
    created_at: String,
    protected: bool,
    exclusive: bool,
    config: Arc<Config>,
}

impl Volume {
    /// A handle for `name` under the configured root, carrying the
    /// configured option defaults until metadata is loaded or options are
    /// applied.
    pub fn new(config: Arc<Config>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            layout: VolumeLayout::new(&config.root, name),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            protected: config.default_protected,
            exclusive: config.default_exclusive,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub fn protected(&self) -> bool {
        self.protected
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn layout(&self) -> &VolumeLayout {
        &self.layout
    }

    /// The path handed to the container runtime.
    pub fn data_dir(&self) -> PathBuf {
        self.layout.data_dir()
    }

    /// Apply creation options. Unknown keys are ignored, as are values that
    /// don't parse as booleans.
    pub fn apply_options(&mut self, options: &HashMap<String, String>) {
        if let Some(protected) = options.get("protected").and_then(|v| parse_bool(v)) {
            self.protected = protected;
        }
        if let Some(exclusive) = options.get("exclusive").and_then(|v| parse_bool(v)) {
            self.exclusive = exclusive;
        }
    }

    /// Create `<mountpoint>/`, `_data/`, and `_locks/` as needed.
    ///
    /// Directories already created by a peer are fine; a non-directory in
    /// the way is not.
    pub fn create_directory_structure(&self) -> Result<()> {
        ensure_dir(self.layout.mountpoint())?;
        ensure_dir(&self.layout.data_dir())?;
        ensure_dir(&self.layout.locks_dir())
    }

    /// Persist the volume attributes, create-exclusive.
    pub fn save_metadata(&self) -> Result<()> {
        metadata::save(
            &self.layout,
            &VolumeMeta {
                name: self.name.clone(),
                mountpoint: self.layout.mountpoint().to_string_lossy().to_string(),
                created_at: self.created_at.clone(),
                protected: self.protected,
                exclusive: self.exclusive,
            },
        )
    }

    /// Populate the attributes from `meta.json`. Values on disk override the
    /// defaults this handle was built with.
    pub fn load_metadata(&mut self) -> Result<()> {
        let meta = metadata::load(&self.layout)?;
        self.created_at = meta.created_at;
        self.protected = meta.protected;
        self.exclusive = meta.exclusive;
        Ok(())
    }

    /// Refresh this host's keep-alive record.
    pub fn lock(&self) -> Result<()> {
        LockRecord::refresh(&self.layout, &self.config.hostname)
    }

    /// Drop this host's keep-alive record. A mountpoint that is already gone
    /// means a peer finished the teardown for us.
    pub fn unlock(&self) -> Result<()> {
        if !self.layout.mountpoint().exists() {
            return Ok(());
        }

        let path = self.layout.lock_file(&self.config.hostname);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SharedFsError::io(&path, e)),
        }
    }

    /// True if any host holds a keep-alive record on this volume.
    pub fn is_locked(&self) -> Result<bool> {
        lock::is_locked(&self.layout)
    }

    /// Remove the volume's on-disk state, unless it is protected or some
    /// host still holds a lock on it.
    pub fn delete(&mut self) -> Result<()> {
        // Reload the metadata to make sure no-one changed it.
        if let Err(e) = self.load_metadata() {
            debug!("could not reload metadata for {}: {}", self.name, e);
        }

        if self.protected {
            return Ok(());
        }

        let mountpoint = self.layout.mountpoint();
        if !mountpoint.exists() {
            return Ok(());
        }

        if self.is_locked()? {
            // The other host's lock prevails.
            return Ok(());
        }

        std::fs::remove_dir_all(mountpoint).map_err(|e| SharedFsError::io(mountpoint, e))
    }

    /// Register a mount for `id`.
    ///
    /// Fast path: a create-exclusive write of the record. When that loses,
    /// the slow path waits out the current holder for at most one lock
    /// timeout, reclaiming the registration if the holder's keep-alive
    /// record expires in the meantime.
    pub async fn mount(&self, id: &str) -> Result<()> {
        let record = MountRecord::new(&self.layout, id, &self.config.hostname, self.exclusive);

        if record.acquire().is_ok() {
            debug!("mount {} acquired on the fast path", id);
            return Ok(());
        }

        self.mount_slow_path(id, &record).await
    }

    async fn mount_slow_path(&self, id: &str, record: &MountRecord) -> Result<()> {
        // The holder's keep-alive is either late or its host is dead.
        // Worth waiting a little and seeing.
        let deadline = tokio::time::Instant::now() + self.config.lock_timeout;

        while tokio::time::Instant::now() < deadline {
            // Sleep first: a live holder gets a chance to refresh its lock.
            tokio::time::sleep(self.config.mount_retry_interval).await;

            let current =
                MountRecord::load(&self.layout, id, self.exclusive).map_err(|e| {
                    SharedFsError::MountInfoUnreadable {
                        name: self.name.clone(),
                        source: Box::new(e),
                    }
                })?;

            // The mount file might be gone already.
            if let Some(current) = current {
                if current.mount_id() == id {
                    // The same id already owns the mount.
                    return Ok(());
                }

                if current.hostname() == self.config.hostname {
                    // Held by us under another id; no point waiting for our
                    // own keep-alive to expire.
                    return Err(SharedFsError::AlreadyMountedOnHost { name: self.name.clone() });
                }

                match LockRecord::read(&self.layout, current.hostname()) {
                    Err(e) => {
                        warn!("failed to load lock file for volume {}: {}", self.name, e);
                        continue;
                    }
                    Ok(Some(holder_lock)) => {
                        if !holder_lock.try_expire(self.config.lock_timeout)? {
                            // Holder is still alive.
                            continue;
                        }
                        // Keep-alive expired and is now removed; the
                        // registration is stale.
                        current.remove()?;
                    }
                    Ok(None) => {
                        // No keep-alive at all; the registration is stale.
                        current.remove()?;
                    }
                }
            }

            match record.acquire() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_already_exists() => {
                    // Lost the reacquisition race; keep waiting.
                }
                Err(e) => return Err(e),
            }
        }

        Err(SharedFsError::Contended { name: self.name.clone() })
    }

    /// Drop the mount registration for `id`.
    ///
    /// A registration owned by another id or host is left alone; tearing
    /// down someone else's mount would be worse than the bookkeeping drift.
    pub fn unmount(&self, id: &str) -> Result<()> {
        match MountRecord::load(&self.layout, id, self.exclusive)? {
            None => {
                warn!("trying to unmount volume {} that is not mounted", self.name);
                Ok(())
            }
            Some(record) if record.mount_id() != id => {
                error!(
                    "trying to unmount volume {} that is mounted for a different id",
                    self.name
                );
                Ok(())
            }
            Some(record) if record.hostname() != self.config.hostname => {
                error!(
                    "trying to unmount volume {} that is mounted for a different host",
                    self.name
                );
                Ok(())
            }
            Some(record) => record.remove(),
        }
    }

    /// All keep-alive records, keyed by hostname.
    pub fn list_locks(&self) -> Result<HashMap<String, LockRecord>> {
        lock::list_locks(&self.layout)
    }

    /// All mount registrations, keyed by record filename stem.
    pub fn list_mounts(&self) -> Result<HashMap<String, MountRecord>> {
        mount::list_mounts(&self.layout)
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => return Err(SharedFsError::NotADirectory { path: path.to_path_buf() }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(SharedFsError::io(path, e)),
    }

    match DirBuilder::new().mode(0o750).create(path) {
        Ok(()) => Ok(()),
        // A peer can win the mkdir race between our stat and create.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(SharedFsError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(root: &TempDir, hostname: &str) -> Arc<Config> {
        let mut config = Config::new(root.path(), hostname);
        config.lock_interval = Duration::from_millis(50);
        config.lock_timeout = Duration::from_millis(200);
        config.mount_retry_interval = Duration::from_millis(20);
        Arc::new(config)
    }

    fn create_volume(config: &Arc<Config>, name: &str) -> Volume {
        let volume = Volume::new(config.clone(), name);
        volume.create_directory_structure().unwrap();
        volume.save_metadata().unwrap();
        volume
    }

    #[test]
    fn test_directory_structure_modes() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let config = test_config(&root, "node-a");
        let volume = create_volume(&config, "v1");

        for dir in [
            volume.layout().mountpoint().to_path_buf(),
            volume.layout().data_dir(),
            volume.layout().locks_dir(),
        ] {
            let meta = std::fs::metadata(&dir).unwrap();
            assert!(meta.is_dir());
            assert_eq!(meta.permissions().mode() & 0o777, 0o750, "{dir:?}");
        }

        // Re-creating over an existing structure is fine.
        volume.create_directory_structure().unwrap();
    }

    #[test]
    fn test_structure_refuses_non_directory() {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, "node-a");
        std::fs::write(root.path().join("v1"), "in the way").unwrap();

        let volume = Volume::new(config, "v1");
        let err = volume.create_directory_structure().unwrap_err();
        assert!(matches!(err, SharedFsError::NotADirectory { .. }));
    }

    #[test]
    fn test_apply_options() {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, "node-a");
        let mut volume = Volume::new(config, "v1");

        let options = HashMap::from([
            ("protected".to_string(), "true".to_string()),
            ("exclusive".to_string(), "not-a-bool".to_string()),
            ("compress".to_string(), "true".to_string()),
        ]);
        volume.apply_options(&options);

        assert!(volume.protected());
        assert!(!volume.exclusive());
    }

    #[test]
    fn test_delete_protected_is_noop() {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, "node-a");
        let mut volume = Volume::new(config, "v1");
        volume.create_directory_structure().unwrap();
        volume.apply_options(&HashMap::from([(
            "protected".to_string(),
            "true".to_string(),
        )]));
        volume.save_metadata().unwrap();

        volume.delete().unwrap();
        assert!(volume.layout().mountpoint().exists());
    }

    #[test]
    fn test_delete_respects_peer_lock() {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, "node-a");
        let mut volume = create_volume(&config, "v1");
        LockRecord::refresh(volume.layout(), "node-b").unwrap();

        volume.delete().unwrap();
        assert!(volume.layout().mountpoint().exists());

        LockRecord::read(volume.layout(), "node-b").unwrap().unwrap().remove().unwrap();
        volume.delete().unwrap();
        assert!(!volume.layout().mountpoint().exists());
    }

    #[test]
    fn test_unlock_with_missing_mountpoint() {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, "node-a");
        let volume = Volume::new(config, "v1");
        // Cleaned up by another host already.
        volume.unlock().unwrap();
    }

    #[tokio::test]
    async fn test_mount_unmount_round_trip() {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, "node-a");
        let volume = create_volume(&config, "v1");

        volume.mount("c1").await.unwrap();
        assert!(volume.layout().mount_file("c1", false).exists());

        volume.unmount("c1").unwrap();
        assert!(!volume.layout().mount_file("c1", false).exists());
        assert!(volume.list_mounts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mount_same_id_is_idempotent() {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, "node-a");
        let volume = create_volume(&config, "v1");

        volume.mount("c1").await.unwrap();
        volume.mount("c1").await.unwrap();
    }

    #[tokio::test]
    async fn test_exclusive_mount_same_host_fails_fast() {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, "node-a");
        let mut volume = Volume::new(config.clone(), "v1");
        volume.create_directory_structure().unwrap();
        volume.apply_options(&HashMap::from([(
            "exclusive".to_string(),
            "true".to_string(),
        )]));
        volume.save_metadata().unwrap();
        volume.lock().unwrap();

        volume.mount("c1").await.unwrap();
        let err = volume.mount("c2").await.unwrap_err();
        assert!(matches!(err, SharedFsError::AlreadyMountedOnHost { .. }));
    }

    #[tokio::test]
    async fn test_contended_mount_times_out_against_live_peer() {
        let root = TempDir::new().unwrap();
        let config_a = test_config(&root, "node-a");
        let config_b = test_config(&root, "node-b");

        let mut volume_a = Volume::new(config_a, "v1");
        volume_a.create_directory_structure().unwrap();
        volume_a
            .apply_options(&HashMap::from([("exclusive".to_string(), "true".to_string())]));
        volume_a.save_metadata().unwrap();
        volume_a.lock().unwrap();
        volume_a.mount("c1").await.unwrap();

        // A live peer keeps refreshing its keep-alive under B's feet.
        let layout_a = volume_a.layout().clone();
        let refresher = tokio::spawn(async move {
            loop {
                LockRecord::refresh(&layout_a, "node-a").unwrap();
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
        });

        let mut volume_b = Volume::new(config_b, "v1");
        volume_b.load_metadata().unwrap();
        let err = volume_b.mount("c2").await.unwrap_err();
        refresher.abort();
        assert!(matches!(err, SharedFsError::Contended { .. }));

        // A's registration survived the siege.
        let record = MountRecord::load(volume_a.layout(), "c1", true).unwrap().unwrap();
        assert_eq!(record.hostname(), "node-a");
    }

    #[tokio::test]
    async fn test_stale_mount_reclaimed_after_lock_expiry() {
        let root = TempDir::new().unwrap();
        let config_b = test_config(&root, "node-b");

        // Host A crashed holding the exclusive mount; its keep-alive is stale.
        let config_a = test_config(&root, "node-a");
        let mut volume_a = Volume::new(config_a, "v1");
        volume_a.create_directory_structure().unwrap();
        volume_a
            .apply_options(&HashMap::from([("exclusive".to_string(), "true".to_string())]));
        volume_a.save_metadata().unwrap();
        volume_a.mount("c1").await.unwrap();
        let stale = Utc::now() - chrono::Duration::hours(1);
        std::fs::write(
            volume_a.layout().lock_file("node-a"),
            stale.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
        .unwrap();

        let mut volume_b = Volume::new(config_b, "v1");
        volume_b.load_metadata().unwrap();
        volume_b.mount("c3").await.unwrap();

        assert!(!volume_a.layout().lock_file("node-a").exists());
        let record = MountRecord::load(volume_b.layout(), "c3", true).unwrap().unwrap();
        assert_eq!(record.mount_id(), "c3");
        assert_eq!(record.hostname(), "node-b");
    }

    #[tokio::test]
    async fn test_unmount_preserves_foreign_records() {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, "node-a");
        let volume = create_volume(&config, "v1");

        // Registration owned by another host.
        MountRecord::new(volume.layout(), "c1", "node-b", false).acquire().unwrap();
        volume.unmount("c1").unwrap();
        assert!(volume.layout().mount_file("c1", false).exists());

        // Unmount of something that was never mounted is a warning-success.
        volume.unmount("c9").unwrap();
    }

    #[test]
    fn test_metadata_round_trip_preserves_attributes() {
        let root = TempDir::new().unwrap();
        let config = test_config(&root, "node-a");
        let mut volume = Volume::new(config.clone(), "v1");
        volume.create_directory_structure().unwrap();
        volume.apply_options(&HashMap::from([
            ("protected".to_string(), "1".to_string()),
            ("exclusive".to_string(), "1".to_string()),
        ]));
        volume.save_metadata().unwrap();

        let mut reloaded = Volume::new(config, "v1");
        reloaded.load_metadata().unwrap();
        assert_eq!(reloaded.name(), "v1");
        assert_eq!(reloaded.created_at(), volume.created_at());
        assert!(reloaded.protected());
        assert!(reloaded.exclusive());
    }
}
