//! The volume driver: a registry of locally-attached volumes plus the
//! operations the plugin protocol dispatches to.
//!
//! One mutex serializes every driver operation and every maintenance pass.
//! A name is registered here iff this host holds (or is establishing) its
//! keep-alive record on that volume.

use crate::config::Config;
use crate::error::{Result, SharedFsError};
use crate::mount::MountRecord;
use crate::volume::Volume;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Driver capability report.
#[derive(Debug, Clone)]
pub struct Capability {
    /// Volume names are cluster-wide, not host-local.
    pub scope: &'static str,
}

/// Everything `Get` reports about one volume.
#[derive(Debug)]
pub struct VolumeInfo {
    pub name: String,
    pub mountpoint: PathBuf,
    pub created_at: String,
    pub status: VolumeStatus,
}

/// The live coordination state of a volume.
#[derive(Debug)]
pub struct VolumeStatus {
    pub protected: bool,
    pub exclusive: bool,
    pub locks: Vec<String>,
    pub mounts: HashMap<String, MountRecord>,
}

/// One `List` entry.
#[derive(Debug)]
pub struct VolumeSummary {
    pub name: String,
    pub mountpoint: PathBuf,
}

pub struct Driver {
    config: Arc<Config>,
    volumes: Mutex<HashMap<String, Volume>>,
}

impl Driver {
    /// Build the driver and discover volumes this host was already using.
    pub async fn new(config: Arc<Config>) -> Self {
        let driver = Self { config, volumes: Mutex::new(HashMap::new()) };
        driver.discover().await;
        driver
    }

    pub fn capabilities(&self) -> Capability {
        debug!("Capabilities");
        Capability { scope: "global" }
    }

    /// Create (or attach to) the named volume and acquire our keep-alive on
    /// it. Losing the cross-host metadata race is normal: the winner's
    /// options are authoritative and we simply load them.
    pub async fn create(&self, name: &str, options: &HashMap<String, String>) -> Result<()> {
        info!("Create: {} {:?}", name, options);

        let mut volumes = self.volumes.lock().await;

        if volumes.contains_key(name) {
            warn!("volume {} already exists", name);
            return Ok(());
        }

        let mut volume = Volume::new(self.config.clone(), name);

        match volume.load_metadata() {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                volume.create_directory_structure()?;
                volume.apply_options(options);
                match volume.save_metadata() {
                    Ok(()) => {}
                    Err(e) if e.is_already_exists() => volume.load_metadata()?,
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }

        // If the volume cannot be locked, we risk that other hosts delete it
        // under us; better to fail the Create than to register.
        volume.lock()?;

        volumes.insert(name.to_string(), volume);
        Ok(())
    }

    /// Release our keep-alive and delete the volume if nobody else holds it.
    pub async fn remove(&self, name: &str) -> Result<()> {
        info!("Remove: {}", name);

        let mut volumes = self.volumes.lock().await;

        if let Some(volume) = volumes.get_mut(name) {
            volume.unlock()?;
            volume.delete()?;
            volumes.remove(name);
        }

        Ok(())
    }

    /// The data path of a registered volume.
    pub async fn path(&self, name: &str) -> Option<PathBuf> {
        debug!("Path: {}", name);
        self.volumes.lock().await.get(name).map(|v| v.data_dir())
    }

    /// Register a mount and return the data path.
    pub async fn mount(&self, name: &str, id: &str) -> Result<PathBuf> {
        info!("Mount: {} ({})", name, id);

        let volumes = self.volumes.lock().await;
        let volume = volumes
            .get(name)
            .ok_or_else(|| SharedFsError::NotRegistered { name: name.to_string() })?;

        volume.mount(id).await?;
        Ok(volume.data_dir())
    }

    /// Drop a mount registration. Unknown names succeed; the runtime calls
    /// this during teardown paths where strictness helps nobody.
    pub async fn unmount(&self, name: &str, id: &str) -> Result<()> {
        info!("Unmount: {} ({})", name, id);

        match self.volumes.lock().await.get(name) {
            Some(volume) => volume.unmount(id),
            None => Ok(()),
        }
    }

    /// The attributes and live coordination state of a registered volume.
    pub async fn get(&self, name: &str) -> Result<VolumeInfo> {
        info!("Get: {}", name);

        let volumes = self.volumes.lock().await;
        let volume = volumes
            .get(name)
            .ok_or_else(|| SharedFsError::NotRegistered { name: name.to_string() })?;

        let mut locks: Vec<String> = match volume.list_locks() {
            Ok(locks) => locks.into_keys().collect(),
            Err(e) => {
                warn!("failed to enumerate locks of volume {}: {}", name, e);
                Vec::new()
            }
        };
        locks.sort();

        let mounts = match volume.list_mounts() {
            Ok(mounts) => mounts,
            Err(e) => {
                warn!("failed to enumerate mounts of volume {}: {}", name, e);
                HashMap::new()
            }
        };

        Ok(VolumeInfo {
            name: volume.name().to_string(),
            mountpoint: volume.data_dir(),
            created_at: volume.created_at().to_string(),
            status: VolumeStatus {
                protected: volume.protected(),
                exclusive: volume.exclusive(),
                locks,
                mounts,
            },
        })
    }

    /// All registered volumes.
    pub async fn list(&self) -> Vec<VolumeSummary> {
        info!("List");

        let volumes = self.volumes.lock().await;
        let mut summaries: Vec<VolumeSummary> = volumes
            .values()
            .map(|v| VolumeSummary { name: v.name().to_string(), mountpoint: v.data_dir() })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Startup discovery: re-register volumes this host had attached (our
    /// keep-alive record exists) and scrub mount registrations left behind
    /// by a previous process lifetime of this host.
    async fn discover(&self) {
        let entries = match std::fs::read_dir(&self.config.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot scan volume root {:?}: {}", self.config.root, e);
                return;
            }
        };

        let mut volumes = self.volumes.lock().await;

        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if volumes.contains_key(&name) {
                continue;
            }

            let mut volume = Volume::new(self.config.clone(), &name);
            if let Err(e) = volume.load_metadata() {
                warn!("failed to load metadata of volume {}: {}", name, e);
                continue;
            }

            self.scrub_own_mounts(&volume);

            if volume.layout().lock_file(&self.config.hostname).is_file() {
                // This volume was locked before; the lock itself is still on
                // disk, the maintenance loop will refresh it.
                info!("loaded previously attached volume {}", name);
                volumes.insert(name, volume);
            }
        }
    }

    /// Remove mount registrations naming this host. Only called at startup,
    /// when no container of ours can legitimately hold one.
    fn scrub_own_mounts(&self, volume: &Volume) {
        let mounts = match volume.list_mounts() {
            Ok(mounts) => mounts,
            Err(e) => {
                warn!("failed to enumerate mounts of volume {}: {}", volume.name(), e);
                return;
            }
        };

        for (stem, record) in mounts {
            if record.hostname() != self.config.hostname {
                continue;
            }
            info!("removing stale mount record {} of volume {}", stem, volume.name());
            if let Err(e) = record.remove() {
                warn!("failed to remove stale mount record {}: {}", stem, e);
            }
        }
    }

    /// Refresh this host's keep-alive on every registered volume.
    pub async fn refresh_locks(&self) {
        let volumes = self.volumes.lock().await;

        for volume in volumes.values() {
            if let Err(e) = volume.lock() {
                warn!("failed to refresh lock on volume {}: {}", volume.name(), e);
            }
        }
    }

    /// Expire stale keep-alive records and remove mount registrations whose
    /// host no longer holds a live lock. A failure on one volume never stops
    /// the sweep.
    pub async fn cleanup(&self) {
        let volumes = self.volumes.lock().await;

        for volume in volumes.values() {
            if let Err(e) = cleanup_volume(volume, self.config.lock_timeout) {
                warn!("cleanup of volume {} failed: {}", volume.name(), e);
            }
        }
    }
}

fn cleanup_volume(volume: &Volume, lock_timeout: Duration) -> Result<()> {
    for lock in volume.list_locks()?.values() {
        match lock.try_expire(lock_timeout) {
            Ok(true) => {
                info!("expired lock of {} on volume {}", lock.hostname(), volume.name())
            }
            Ok(false) => {}
            Err(e) => {
                warn!("failed to expire lock of {} on volume {}: {}", lock.hostname(), volume.name(), e)
            }
        }
    }

    // Only hosts whose records survived the sweep count as live.
    let live: HashSet<String> = volume.list_locks()?.into_keys().collect();

    for (stem, record) in volume.list_mounts()? {
        if live.contains(record.hostname()) {
            continue;
        }
        info!("removing orphan mount {} of volume {}", stem, volume.name());
        if let Err(e) = record.remove() {
            warn!("failed to remove orphan mount {}: {}", stem, e);
        }
    }

    Ok(())
}
