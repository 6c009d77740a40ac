//! Volume metadata persistence.
//!
//! `meta.json` is the write-once record of a volume's attributes. It is
//! created with `O_CREAT|O_EXCL` so that when two hosts race a `Create` for
//! the same name, exactly one wins; the loser observes the existing file and
//! reloads it instead of clobbering the winner's options.

use crate::error::{Result, SharedFsError};
use crate::paths::VolumeLayout;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;

/// On-disk shape of `meta.json`.
///
/// Key casing matches the upstream volume schema so existing deployments can
/// be discovered in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMeta {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,

    #[serde(rename = "CreatedAt")]
    pub created_at: String,

    #[serde(rename = "Protected", default)]
    pub protected: bool,

    #[serde(rename = "Exclusive", default)]
    pub exclusive: bool,
}

/// Write `meta.json`, failing with `AlreadyExists` if any host got there
/// first. The existing file is never modified.
pub fn save(layout: &VolumeLayout, meta: &VolumeMeta) -> Result<()> {
    let path = layout.meta_file();

    let content = serde_json::to_vec_pretty(meta)
        .map_err(|e| SharedFsError::InvalidRecord { path: path.clone(), source: e })?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&path)
        .map_err(|e| SharedFsError::io(&path, e))?;

    // write_all turns a short write into an error rather than a truncated record
    file.write_all(&content).map_err(|e| SharedFsError::io(&path, e))
}

/// Read and parse `meta.json`.
pub fn load(layout: &VolumeLayout) -> Result<VolumeMeta> {
    let path = layout.meta_file();

    let content = std::fs::read_to_string(&path).map_err(|e| SharedFsError::io(&path, e))?;

    serde_json::from_str(&content)
        .map_err(|e| SharedFsError::InvalidRecord { path: path.clone(), source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_layout(root: &TempDir) -> VolumeLayout {
        let layout = VolumeLayout::new(root.path(), "vol1");
        std::fs::create_dir_all(layout.mountpoint()).unwrap();
        layout
    }

    fn test_meta(layout: &VolumeLayout) -> VolumeMeta {
        VolumeMeta {
            name: "vol1".to_string(),
            mountpoint: layout.mountpoint().to_string_lossy().to_string(),
            created_at: "2026-08-02T10:00:00Z".to_string(),
            protected: true,
            exclusive: false,
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let root = TempDir::new().unwrap();
        let layout = test_layout(&root);
        let meta = test_meta(&layout);

        save(&layout, &meta).unwrap();
        let loaded = load(&layout).unwrap();

        assert_eq!(loaded.name, meta.name);
        assert_eq!(loaded.created_at, meta.created_at);
        assert_eq!(loaded.protected, meta.protected);
        assert_eq!(loaded.exclusive, meta.exclusive);
    }

    #[test]
    fn test_save_is_create_exclusive() {
        let root = TempDir::new().unwrap();
        let layout = test_layout(&root);
        let meta = test_meta(&layout);

        save(&layout, &meta).unwrap();

        let mut second = meta.clone();
        second.protected = false;
        second.exclusive = true;
        let err = save(&layout, &second).unwrap_err();
        assert!(err.is_already_exists());

        // The loser must not have clobbered the winner's options.
        let loaded = load(&layout).unwrap();
        assert!(loaded.protected);
        assert!(!loaded.exclusive);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let root = TempDir::new().unwrap();
        let layout = test_layout(&root);
        assert!(load(&layout).unwrap_err().is_not_found());
    }

    #[test]
    fn test_on_disk_keys_are_pascal_case() {
        let root = TempDir::new().unwrap();
        let layout = test_layout(&root);
        save(&layout, &test_meta(&layout)).unwrap();

        let raw = std::fs::read_to_string(layout.meta_file()).unwrap();
        for key in ["\"Name\"", "\"Mountpoint\"", "\"CreatedAt\"", "\"Protected\"", "\"Exclusive\""] {
            assert!(raw.contains(key), "missing {key} in {raw}");
        }
    }

    #[test]
    fn test_mode_is_0600() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let layout = test_layout(&root);
        save(&layout, &test_meta(&layout)).unwrap();

        let mode = std::fs::metadata(layout.meta_file()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let root = TempDir::new().unwrap();
        let layout = test_layout(&root);
        std::fs::write(layout.meta_file(), "not json").unwrap();

        let err = load(&layout).unwrap_err();
        assert!(matches!(err, SharedFsError::InvalidRecord { .. }));
        assert!(Path::new(&layout.meta_file()).exists());
    }
}
