//! File-manager bookmarks for connected devices.
//!
//! The bookmark file is a GTK-style list with one `<uri> <label>` entry per
//! line. Lines we own have a label ending in ` (<sanitized name>)`, which lets
//! removal find every line of a device without touching anybody else's.
//! Every change rewrites the whole file atomically, since file managers may
//! read it at any moment.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use url::Url;

use crate::error::{IoResultExt, Result};
use crate::fsio;
use crate::identity::DeviceIdentity;
use crate::symlink::LinkedEntry;

/// Bookmark list handling; a disabled instance does nothing.
#[derive(Debug, Clone)]
pub struct Bookmarks {
    file: PathBuf,
    enabled: bool,
}

impl Bookmarks {
    pub fn new(file: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            file: file.into(),
            enabled,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Adds one bookmark per linked entry unless the exact line already exists.
    ///
    /// Returns the number of lines added.
    pub fn add(&self, identity: &DeviceIdentity, linked: &[LinkedEntry]) -> Result<usize> {
        if !self.enabled || linked.is_empty() {
            return Ok(0);
        }

        let mut lines = self.read_lines()?;
        let mut added = 0;
        for entry in linked {
            let Some(line) = bookmark_line(&entry.link, &entry.label, &identity.sanitized_name)
            else {
                warn!(link = %entry.link.display(), "link path is not absolute, no bookmark");
                continue;
            };
            if !lines.iter().any(|l| *l == line) {
                lines.push(line);
                added += 1;
            }
        }

        if added > 0 {
            self.write_lines(&lines)?;
            info!(device = %identity.sanitized_name, added, "added bookmarks");
        }
        Ok(added)
    }

    /// Removes every bookmark line belonging to `sanitized_name`.
    ///
    /// Returns the number of lines removed. The file is left untouched when
    /// nothing matches.
    pub fn remove(&self, sanitized_name: &str) -> Result<usize> {
        if !self.enabled {
            return Ok(0);
        }

        let lines = self.read_lines()?;
        let before = lines.len();
        let kept: Vec<String> = lines
            .into_iter()
            .filter(|l| !line_belongs_to(l, sanitized_name))
            .collect();
        let removed = before - kept.len();

        if removed > 0 {
            self.write_lines(&kept)?;
            info!(device = %sanitized_name, removed, "removed bookmarks");
        } else {
            debug!(device = %sanitized_name, "no bookmarks to remove");
        }
        Ok(removed)
    }

    /// Removes the bookmarks of `sanitized_name` that point at one of `links`.
    ///
    /// Used when a device comes back with fewer storage roots than before.
    pub fn remove_links(&self, sanitized_name: &str, links: &[PathBuf]) -> Result<usize> {
        if !self.enabled || links.is_empty() {
            return Ok(0);
        }

        let uris: Vec<String> = links.iter().filter_map(|l| file_uri(l)).collect();
        let lines = self.read_lines()?;
        let before = lines.len();
        let kept: Vec<String> = lines
            .into_iter()
            .filter(|l| {
                let uri = l.split_once(' ').map_or(l.as_str(), |(uri, _)| uri);
                !(line_belongs_to(l, sanitized_name) && uris.iter().any(|u| u == uri))
            })
            .collect();
        let removed = before - kept.len();

        if removed > 0 {
            self.write_lines(&kept)?;
            info!(device = %sanitized_name, removed, "removed stale bookmarks");
        }
        Ok(removed)
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        match fs::read_to_string(&self.file) {
            Ok(contents) => Ok(contents.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).bookmark_read_context(&self.file),
        }
    }

    fn write_lines(&self, lines: &[String]) -> Result<()> {
        let mut contents = String::new();
        for line in lines {
            contents.push_str(line);
            contents.push('\n');
        }
        fsio::write_atomic(&self.file, contents.as_bytes()).bookmark_write_context(&self.file)
    }
}

/// Formats the bookmark line for one link; `None` if `link` is relative.
pub fn bookmark_line(link: &Path, label: &str, sanitized_name: &str) -> Option<String> {
    let uri = file_uri(link)?;
    Some(format!("{uri} {label} ({sanitized_name})"))
}

/// True if `line` is a bookmark created for `sanitized_name`.
pub fn line_belongs_to(line: &str, sanitized_name: &str) -> bool {
    let Some((_uri, label)) = line.split_once(' ') else {
        return false;
    };
    let suffix = format!("({sanitized_name})");
    label == suffix || label.ends_with(&format!(" {suffix}"))
}

/// `file://` URI for an absolute path.
pub fn file_uri(path: &Path) -> Option<String> {
    Url::from_file_path(path).ok().map(String::from)
}
