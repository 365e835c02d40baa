//! Symlinks from a device directory into the device's storage roots.
//!
//! `sync` is idempotent and self-healing: a correct link is left alone, a
//! stale link is replaced, and anything that is not a symlink is never
//! touched. `remove_all` deletes only the links recorded at connect time.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::safety;
use crate::storage::StorageEntry;

/// A link that points at its storage entry after `sync`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedEntry {
    pub label: String,
    pub link: PathBuf,
    pub target: PathBuf,
}

/// What `sync` did for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    Replaced,
    Unchanged,
    /// A regular file or directory holds the name; left alone.
    Occupied,
}

/// Result of syncing one device directory.
#[derive(Debug, Clone, Default)]
pub struct LinkReport {
    pub linked: Vec<LinkedEntry>,
    pub skipped: Vec<PathBuf>,
}

impl LinkReport {
    /// Number of entries that now have a correct link.
    pub fn created_count(&self) -> usize {
        self.linked.len()
    }

    pub fn link_paths(&self) -> Vec<PathBuf> {
        self.linked.iter().map(|l| l.link.clone()).collect()
    }
}

/// Makes `device_dir/<label>` a symlink to each entry's path.
///
/// Failures are logged per entry and do not stop the others.
pub fn sync(device_dir: &Path, entries: &[StorageEntry]) -> LinkReport {
    let mut report = LinkReport::default();

    for entry in entries {
        let link = device_dir.join(&entry.label);
        match sync_one(&link, &entry.path) {
            Ok(LinkOutcome::Occupied) => {
                warn!(
                    link = %link.display(),
                    "name is taken by something that is not a symlink, skipping"
                );
                report.skipped.push(link);
            }
            Ok(outcome) => {
                debug!(link = %link.display(), target = %entry.path.display(), ?outcome, "link in place");
                report.linked.push(LinkedEntry {
                    label: entry.label.clone(),
                    link,
                    target: entry.path.clone(),
                });
            }
            Err(e) => {
                warn!(link = %link.display(), error = %e, "failed to create link");
                report.skipped.push(link);
            }
        }
    }

    report
}

/// Brings one link in line with `target`.
pub fn sync_one(link: &Path, target: &Path) -> io::Result<LinkOutcome> {
    match fs::symlink_metadata(link) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            symlink(target, link)?;
            Ok(LinkOutcome::Created)
        }
        Err(e) => Err(e),
        Ok(meta) if meta.file_type().is_symlink() => {
            if fs::read_link(link)? == target {
                return Ok(LinkOutcome::Unchanged);
            }
            fs::remove_file(link)?;
            symlink(target, link)?;
            Ok(LinkOutcome::Replaced)
        }
        Ok(_) => Ok(LinkOutcome::Occupied),
    }
}

/// Removes each recorded link that is still a symlink inside `base_dir`.
///
/// Returns how many links were removed. Paths that vanished or turned into
/// something else are skipped.
pub fn remove_all(links: &[PathBuf], base_dir: &Path) -> usize {
    let mut removed = 0;

    for link in links {
        let is_link = fs::symlink_metadata(link)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            debug!(link = %link.display(), "not a symlink anymore, skipping");
            continue;
        }
        if !safety::guard_deletion(link, base_dir) {
            continue;
        }
        match fs::remove_file(link) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(link = %link.display(), error = %e, "failed to remove link"),
        }
    }

    removed
}

/// Removes `device_dir` if it is empty and passes the deletion guard.
///
/// Returns true if the directory is gone afterwards.
pub fn remove_dir_if_empty(device_dir: &Path, base_dir: &Path) -> bool {
    if !device_dir.exists() {
        return true;
    }
    if !safety::guard_deletion(device_dir, base_dir) {
        return false;
    }
    match fs::remove_dir(device_dir) {
        Ok(()) => {
            info!(dir = %device_dir.display(), "removed device directory");
            true
        }
        Err(e) => {
            debug!(dir = %device_dir.display(), error = %e, "device directory kept");
            false
        }
    }
}
