//! Mount detection under the GVfs mount root.
//!
//! A device mount shows up as a directory named like
//! `sftp:host=10.0.0.5,port=1739`. Its absence is the normal idle state, so
//! nothing here returns an error: an unreadable or missing root is simply
//! "no mount".

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Error;
use crate::timeout::SingleFlight;

/// Prefix shared by every device mount name.
pub const MOUNT_PREFIX: &str = "sftp:";

/// A live device mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountHandle {
    pub path: PathBuf,
    pub host: String,
    pub port: Option<u16>,
}

/// Something that can tell whether a device is mounted right now.
pub trait MountSource {
    fn detect(&self) -> Option<MountHandle>;
}

/// Scans a mount root on the local filesystem with a deadline.
#[derive(Debug, Clone)]
pub struct FsMountSource {
    root: PathBuf,
    timeout: Duration,
    flight: SingleFlight,
}

impl FsMountSource {
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
            flight: SingleFlight::new(),
        }
    }
}

impl MountSource for FsMountSource {
    fn detect(&self) -> Option<MountHandle> {
        detect_mount(&self.root, self.timeout, &self.flight)
    }
}

/// Parses `sftp:host=<host>[,port=<port>][,key=value...]` into host and port.
pub fn parse_mount_name(name: &str) -> Option<(String, Option<u16>)> {
    let params = name.strip_prefix(MOUNT_PREFIX)?;

    let mut host = None;
    let mut port = None;
    for pair in params.split(',') {
        let (key, value) = pair.split_once('=')?;
        match key {
            "host" => host = Some(value),
            "port" => port = Some(value.parse::<u16>().ok()?),
            _ => {}
        }
    }

    let host = host.filter(|h| !h.is_empty())?;
    Some((host.to_string(), port))
}

/// All device mounts directly under `root`, sorted by directory name.
pub fn scan_once(root: &Path) -> Vec<MountHandle> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "mount root not readable");
            return Vec::new();
        }
    };

    let mut mounts: Vec<(String, MountHandle)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let (host, port) = parse_mount_name(&name)?;
            let path = entry.path();
            if !path.is_dir() {
                return None;
            }
            Some((name, MountHandle { path, host, port }))
        })
        .collect();

    mounts.sort_by(|(a, _), (b, _)| a.cmp(b));
    mounts.into_iter().map(|(_, handle)| handle).collect()
}

/// The first device mount under `root`, or `None`.
///
/// Gives up after `limit` so a hung network mount cannot stall the caller.
/// While a scan abandoned that way is still blocked, later calls return
/// `None` straight away instead of starting another one.
pub fn detect_mount(root: &Path, limit: Duration, flight: &SingleFlight) -> Option<MountHandle> {
    detect_with(root, limit, flight, scan_once)
}

fn detect_with(
    root: &Path,
    limit: Duration,
    flight: &SingleFlight,
    scan: fn(&Path) -> Vec<MountHandle>,
) -> Option<MountHandle> {
    let root_owned = root.to_path_buf();
    let mounts = match flight.run("mount scan", limit, move || scan(&root_owned)) {
        Ok(mounts) => mounts,
        Err(e @ Error::StillPending { .. }) => {
            debug!(root = %root.display(), error = %e, "skipping mount scan");
            return None;
        }
        Err(e) => {
            warn!(root = %root.display(), error = %e, "mount scan did not complete");
            return None;
        }
    };

    if mounts.len() > 1 {
        debug!(count = mounts.len(), "several device mounts present, using the first");
    }
    mounts.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mount_name() {
        assert_eq!(
            parse_mount_name("sftp:host=10.0.0.5,port=1739"),
            Some(("10.0.0.5".to_string(), Some(1739)))
        );
        assert_eq!(
            parse_mount_name("sftp:host=phone.local"),
            Some(("phone.local".to_string(), None))
        );
        assert_eq!(
            parse_mount_name("sftp:host=10.0.0.5,user=kdeconnect,port=22"),
            Some(("10.0.0.5".to_string(), Some(22)))
        );
    }

    #[test]
    fn test_parse_mount_name_rejects_others() {
        assert_eq!(parse_mount_name("smb-share:server=nas,share=media"), None);
        assert_eq!(parse_mount_name("sftp:host="), None);
        assert_eq!(parse_mount_name("sftp:port=22"), None);
        assert_eq!(parse_mount_name("sftp:host=a,port=notaport"), None);
        assert_eq!(parse_mount_name("sftp:host=a,port=70000"), None);
        assert_eq!(parse_mount_name("sftp:garbage"), None);
    }

    #[test]
    fn test_scan_once_filters_and_sorts() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("sftp:host=10.0.0.9")).unwrap();
        fs::create_dir(root.path().join("sftp:host=10.0.0.5,port=1739")).unwrap();
        fs::create_dir(root.path().join("smb-share:server=nas")).unwrap();
        fs::write(root.path().join("sftp:host=10.0.0.1"), "not a dir").unwrap();

        let mounts = scan_once(root.path());
        let hosts: Vec<_> = mounts.iter().map(|m| m.host.as_str()).collect();
        assert_eq!(hosts, vec!["10.0.0.5", "10.0.0.9"]);
        assert_eq!(mounts[0].port, Some(1739));
    }

    #[test]
    fn test_detect_mount_missing_or_empty_root() {
        let root = tempfile::tempdir().unwrap();
        let limit = Duration::from_secs(5);
        let flight = SingleFlight::new();
        assert_eq!(detect_mount(root.path(), limit, &flight), None);
        assert_eq!(detect_mount(&root.path().join("absent"), limit, &flight), None);
    }

    #[test]
    fn test_detect_mount_picks_lexicographically_first() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("sftp:host=b")).unwrap();
        fs::create_dir(root.path().join("sftp:host=a")).unwrap();

        let source = FsMountSource::new(root.path(), Duration::from_secs(5));
        let mount = source.detect().unwrap();
        assert_eq!(mount.host, "a");
        assert_eq!(mount.path, root.path().join("sftp:host=a"));
    }

    fn slow_scan(root: &Path) -> Vec<MountHandle> {
        std::thread::sleep(Duration::from_millis(300));
        vec![MountHandle {
            path: root.join("sftp:host=slow"),
            host: "slow".to_string(),
            port: None,
        }]
    }

    #[test]
    fn test_hung_scan_is_not_restarted() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("sftp:host=a")).unwrap();
        let flight = SingleFlight::new();
        let limit = Duration::from_millis(20);

        assert_eq!(detect_with(root.path(), limit, &flight, slow_scan), None);
        assert!(flight.is_busy());
        // The first scan is still blocked, so this one never starts.
        assert_eq!(detect_with(root.path(), limit, &flight, scan_once), None);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while flight.is_busy() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let mount = detect_with(root.path(), Duration::from_secs(5), &flight, scan_once).unwrap();
        assert_eq!(mount.host, "a");
    }
}
