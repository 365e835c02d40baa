//! Storage discovery on a mounted device.
//!
//! A device exposes zero or more storage roots below its mount point. Which
//! relative paths to look for is configured per kind; discovery keeps the ones
//! that exist, internal first, then external, then usb.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::timeout::SingleFlight;

/// Kind of storage exposed by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Internal,
    External,
    Usb,
}

impl StorageKind {
    /// All kinds in discovery order.
    pub const ALL: [StorageKind; 3] = [StorageKind::Internal, StorageKind::External, StorageKind::Usb];

    /// Base label used for links and bookmarks.
    pub fn label(self) -> &'static str {
        match self {
            StorageKind::Internal => "Internal",
            StorageKind::External => "External",
            StorageKind::Usb => "USB",
        }
    }

    /// Label of the `index`-th (zero based) configured path of this kind.
    pub fn label_for(self, index: usize) -> String {
        if index == 0 {
            self.label().to_string()
        } else {
            format!("{} {}", self.label(), index + 1)
        }
    }
}

/// One storage root found on a mounted device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub kind: StorageKind,
    /// Absolute path below the mount point.
    pub path: PathBuf,
    /// Link and bookmark name, e.g. `Internal` or `External 2`.
    pub label: String,
}

/// Lists the configured storage paths that exist under `mount_point`.
///
/// Missing paths are logged and skipped. An empty result means the device
/// has no usable storage right now (often: the phone is still locked).
pub fn discover(mount_point: &Path, config: &StorageConfig) -> Vec<StorageEntry> {
    let mut entries = Vec::new();

    for (kind, index, relative) in configured(config) {
        let path = mount_point.join(relative);
        if path.is_dir() {
            debug!(kind = ?kind, path = %path.display(), "found storage");
            entries.push(StorageEntry {
                kind,
                path,
                label: kind.label_for(index),
            });
        } else {
            debug!(kind = ?kind, path = %path.display(), "storage path not present");
        }
    }

    entries
}

/// [`discover`] with a deadline. A timeout is reported as no storage, and so
/// is any call made while an earlier timed-out discovery is still blocked.
pub fn discover_bounded(
    mount_point: &Path,
    config: &StorageConfig,
    limit: Duration,
    flight: &SingleFlight,
) -> Vec<StorageEntry> {
    let mount_point = mount_point.to_path_buf();
    let config = config.clone();
    match flight.run("storage discovery", limit, move || {
        discover(&mount_point, &config)
    }) {
        Ok(entries) => entries,
        Err(e) => {
            info!(error = %e, "no storage found within timeout");
            Vec::new()
        }
    }
}

/// Every label discovery could ever produce for this configuration.
pub fn candidate_labels(config: &StorageConfig) -> Vec<String> {
    configured(config)
        .map(|(kind, index, _)| kind.label_for(index))
        .collect()
}

/// Usable configured paths with their kind and per-kind position.
fn configured(config: &StorageConfig) -> impl Iterator<Item = (StorageKind, usize, &Path)> {
    StorageKind::ALL.into_iter().flat_map(move |kind| {
        config
            .paths(kind)
            .iter()
            .enumerate()
            .filter_map(move |(index, relative)| {
                if is_plain_relative(relative) {
                    Some((kind, index, relative.as_path()))
                } else {
                    warn!(
                        kind = ?kind,
                        path = %relative.display(),
                        "ignoring storage path that is absolute or leaves the mount"
                    );
                    None
                }
            })
    })
}

fn is_plain_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config(internal: &[&str], external: &[&str], usb: &[&str]) -> StorageConfig {
        let paths = |v: &[&str]| v.iter().map(PathBuf::from).collect();
        StorageConfig {
            internal: paths(internal),
            external: paths(external),
            usb: paths(usb),
        }
    }

    #[test]
    fn test_discover_orders_by_kind_then_config() {
        let mount = tempfile::tempdir().unwrap();
        for p in ["usb/a", "sd/1", "sd/2", "data"] {
            fs::create_dir_all(mount.path().join(p)).unwrap();
        }

        let cfg = config(&["data"], &["sd/1", "sd/2"], &["usb/a"]);
        let entries = discover(mount.path(), &cfg);

        let labels: Vec<_> = entries.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["Internal", "External", "External 2", "USB"]);
        assert_eq!(entries[0].path, mount.path().join("data"));
        assert_eq!(entries[3].kind, StorageKind::Usb);
    }

    #[test]
    fn test_discover_skips_missing_and_keeps_labels_stable() {
        let mount = tempfile::tempdir().unwrap();
        fs::create_dir_all(mount.path().join("sd/2")).unwrap();

        let cfg = config(&["data"], &["sd/1", "sd/2"], &[]);
        let entries = discover(mount.path(), &cfg);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].label, "External 2");
    }

    #[test]
    fn test_discover_empty_when_nothing_exists() {
        let mount = tempfile::tempdir().unwrap();
        let cfg = config(&["data"], &[], &[]);
        assert!(discover(mount.path(), &cfg).is_empty());
        assert!(discover(&mount.path().join("gone"), &cfg).is_empty());
    }

    #[test]
    fn test_discover_rejects_escaping_paths() {
        let root = tempfile::tempdir().unwrap();
        let mount = root.path().join("mnt");
        fs::create_dir_all(&mount).unwrap();
        fs::create_dir_all(root.path().join("outside")).unwrap();

        let cfg = config(&["../outside", "/tmp"], &[], &[]);
        assert!(discover(&mount, &cfg).is_empty());
    }

    #[test]
    fn test_candidate_labels() {
        let cfg = config(&["a"], &["b", "c"], &["d"]);
        assert_eq!(
            candidate_labels(&cfg),
            vec!["Internal", "External", "External 2", "USB"]
        );
    }

    #[test]
    fn test_discover_bounded_matches_unbounded() {
        let mount = tempfile::tempdir().unwrap();
        fs::create_dir_all(mount.path().join("data")).unwrap();
        let cfg = config(&["data"], &[], &[]);
        let flight = SingleFlight::new();
        assert_eq!(
            discover_bounded(mount.path(), &cfg, Duration::from_secs(5), &flight),
            discover(mount.path(), &cfg)
        );
        assert!(!flight.is_busy());
    }

    #[test]
    fn test_discover_bounded_skips_while_earlier_call_pending() {
        let mount = tempfile::tempdir().unwrap();
        fs::create_dir_all(mount.path().join("data")).unwrap();
        let cfg = config(&["data"], &[], &[]);

        let flight = SingleFlight::new();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let stuck = flight.run("storage discovery", Duration::from_millis(20), move || {
            let _ = release_rx.recv();
        });
        assert!(stuck.is_err());

        assert!(discover_bounded(mount.path(), &cfg, Duration::from_secs(5), &flight).is_empty());
        release_tx.send(()).unwrap();
    }
}
