//! Deletion guard.
//!
//! Every removal of a device directory or symlink goes through
//! [`validate_deletable`] first. The check works on canonical paths so `..`
//! segments and symlinked parents cannot walk out of the base directory.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::error;

/// Returns true if `path` may be deleted as part of the artifacts under `base_dir`.
///
/// Rejected: an empty path, the filesystem root, the home directory, the base
/// directory itself, and anything whose canonical location is not strictly
/// inside the canonical base directory. A symlink is judged by where the link
/// itself lives, not by its target, since removing it never touches the target.
/// A path that does not exist yet is judged by its canonical parent.
pub fn validate_deletable(path: &Path, base_dir: &Path) -> bool {
    if path.as_os_str().is_empty() || path == Path::new("/") {
        return false;
    }

    let Ok(base) = fs::canonicalize(base_dir) else {
        return false;
    };
    let Some(candidate) = canonical_location(path) else {
        return false;
    };

    if candidate == Path::new("/") || candidate == base {
        return false;
    }
    if let Some(home) = dirs::home_dir() {
        let home = fs::canonicalize(&home).unwrap_or(home);
        if candidate == home {
            return false;
        }
    }

    candidate.starts_with(&base)
}

/// Like [`validate_deletable`], but logs the rejection at error level.
pub fn guard_deletion(path: &Path, base_dir: &Path) -> bool {
    let allowed = validate_deletable(path, base_dir);
    if !allowed {
        error!(
            path = %path.display(),
            base = %base_dir.display(),
            "refusing to delete path outside the managed base directory"
        );
    }
    allowed
}

/// Canonical location of the directory entry named by `path`.
fn canonical_location(path: &Path) -> Option<PathBuf> {
    let is_link = fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);

    if !is_link {
        match fs::canonicalize(path) {
            Ok(canonical) => return Some(canonical),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(_) => return None,
        }
    }

    // Symlink or missing entry: canonicalize the parent, keep the final name.
    let name = match path.components().next_back()? {
        Component::Normal(name) => name.to_owned(),
        _ => return None,
    };
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty())?;
    let parent = fs::canonicalize(parent).ok()?;
    Some(parent.join(name))
}
