//! Persistent state: the currently tracked device and the managed devices log.
//!
//! Files under the state directory:
//!
//! - `state.json`: the tracked device (or `null`), including the symlinks that
//!   were created for it. Rewritten atomically.
//! - `managed_devices.jsonl`: one identity per line for every device ever
//!   connected. Append-only; compacted into a fresh file when it grows past
//!   the configured size, with the previous file kept as `.1`.
//!
//! Only the daemon holding the instance lock writes these files.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::{info, warn};

use crate::error::{IoResultExt, Result, StateDecodeSnafu, StateEncodeSnafu};
use crate::fsio;
use crate::identity::DeviceIdentity;

const STATE_FILE: &str = "state.json";
const MANAGED_LOG_FILE: &str = "managed_devices.jsonl";
const STATE_VERSION: u32 = 1;

/// The device the daemon currently considers connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedDevice {
    #[serde(flatten)]
    pub identity: DeviceIdentity,
    /// Mount directory the links point into.
    pub mount_path: PathBuf,
    /// Symlinks created for this device; exactly these are removed on disconnect.
    #[serde(default)]
    pub links: Vec<PathBuf>,
}

/// On-disk record of `state.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub device: Option<TrackedDevice>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            device: None,
        }
    }
}

fn default_version() -> u32 {
    STATE_VERSION
}

/// Reads and writes the files in the state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_path: PathBuf,
    log_path: PathBuf,
    log_max_bytes: u64,
}

impl StateStore {
    pub fn new(state_dir: &Path, log_max_bytes: u64) -> Self {
        Self {
            state_path: state_dir.join(STATE_FILE),
            log_path: state_dir.join(MANAGED_LOG_FILE),
            log_max_bytes,
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Loads the state, treating a missing file as empty.
    ///
    /// A file that cannot be parsed is moved aside to `state.json.corrupt` and
    /// the state is reported empty, so startup reconciliation still runs.
    pub fn load(&self) -> Result<PersistedState> {
        let Some(contents) = self.read_contents()? else {
            return Ok(PersistedState::default());
        };

        match serde_json::from_str(&contents) {
            Ok(state) => Ok(state),
            Err(e) => {
                let aside = self.state_path.with_extension("json.corrupt");
                warn!(
                    path = %self.state_path.display(),
                    error = %e,
                    "state file is corrupt, moving it to {}",
                    aside.display()
                );
                fs::rename(&self.state_path, &aside).state_write_context(&aside)?;
                Ok(PersistedState::default())
            }
        }
    }

    /// Loads the state without modifying anything on disk.
    ///
    /// For readers that do not hold the instance lock: a corrupt file is an
    /// error here and stays where it is.
    pub fn peek(&self) -> Result<PersistedState> {
        match self.read_contents()? {
            Some(contents) => serde_json::from_str(&contents).context(StateDecodeSnafu {
                path: &self.state_path,
            }),
            None => Ok(PersistedState::default()),
        }
    }

    fn read_contents(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.state_path) {
            Ok(c) => Ok(Some(c)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).state_read_context(&self.state_path),
        }
    }

    /// The tracked device, if any.
    pub fn current(&self) -> Result<Option<TrackedDevice>> {
        Ok(self.load()?.device)
    }

    /// Records `device` as the connected device.
    pub fn save_current(&self, device: &TrackedDevice) -> Result<()> {
        self.save(&PersistedState {
            version: STATE_VERSION,
            device: Some(device.clone()),
        })
    }

    /// Forgets the connected device.
    pub fn clear(&self) -> Result<()> {
        self.save(&PersistedState::default())
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        let contents = serde_json::to_string_pretty(state).context(StateEncodeSnafu)?;
        fsio::write_atomic(&self.state_path, contents.as_bytes())
            .state_write_context(&self.state_path)
    }

    /// Appends `identity` to the managed devices log unless its sanitized name
    /// is already there. Returns whether a line was written.
    pub fn record_managed(&self, identity: &DeviceIdentity) -> Result<bool> {
        let known = self.managed_devices()?;
        if known.iter().any(|d| d.same_device(identity)) {
            return Ok(false);
        }

        let mut line = serde_json::to_string(identity).context(StateEncodeSnafu)?;
        line.push('\n');

        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent).log_append_context(&self.log_path)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .log_append_context(&self.log_path)?;
        file.write_all(line.as_bytes())
            .log_append_context(&self.log_path)?;
        drop(file);

        self.rotate_if_oversized()?;
        Ok(true)
    }

    /// Every device ever managed, deduplicated by sanitized name, oldest first.
    pub fn managed_devices(&self) -> Result<Vec<DeviceIdentity>> {
        let contents = match fs::read_to_string(&self.log_path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).state_read_context(&self.log_path),
        };

        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DeviceIdentity>(line) {
                Ok(identity) => {
                    if seen.insert(identity.sanitized_name.clone()) {
                        devices.push(identity);
                    }
                }
                Err(e) => warn!(
                    path = %self.log_path.display(),
                    line = number + 1,
                    error = %e,
                    "skipping unreadable managed devices entry"
                ),
            }
        }
        Ok(devices)
    }

    fn rotate_if_oversized(&self) -> Result<()> {
        let size = match fs::metadata(&self.log_path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size <= self.log_max_bytes {
            return Ok(());
        }

        let devices = self.managed_devices()?;
        let mut compacted = String::new();
        for identity in &devices {
            compacted.push_str(&serde_json::to_string(identity).context(StateEncodeSnafu)?);
            compacted.push('\n');
        }

        let backup = self.log_path.with_extension("jsonl.1");
        fs::copy(&self.log_path, &backup).state_write_context(&backup)?;
        fsio::write_atomic(&self.log_path, compacted.as_bytes())
            .state_write_context(&self.log_path)?;

        info!(
            path = %self.log_path.display(),
            previous_bytes = size,
            devices = devices.len(),
            "rotated managed devices log"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn tracked(name: &str) -> TrackedDevice {
        TrackedDevice {
            identity: DeviceIdentity::new(name, "10.0.0.5", Some(1739)),
            mount_path: PathBuf::from("/run/user/1000/gvfs/sftp:host=10.0.0.5,port=1739"),
            links: vec![PathBuf::from(format!("/home/u/Devices/{name}/Internal"))],
        }
    }

    #[test]
    fn test_missing_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 1024);
        assert_eq!(store.current().unwrap(), None);
        assert_eq!(store.load().unwrap(), PersistedState::default());
    }

    #[test]
    fn test_save_clear_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(&dir.path().join("state"), 1024);

        let device = tracked("MyPhone");
        store.save_current(&device).unwrap();
        assert_eq!(store.current().unwrap(), Some(device));

        store.clear().unwrap();
        assert_eq!(store.current().unwrap(), None);
    }

    #[test]
    fn test_state_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 1024);
        store.save_current(&tracked("MyPhone")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.state_path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["device"]["display_name"], "MyPhone");
        assert_eq!(raw["device"]["sanitized_name"], "MyPhone");
        assert_eq!(raw["device"]["host"], "10.0.0.5");
        assert_eq!(raw["device"]["port"], 1739);
    }

    #[test]
    fn test_corrupt_state_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 1024);
        fs::write(store.state_path(), "{not json").unwrap();

        assert_eq!(store.current().unwrap(), None);
        assert!(!store.state_path().exists());
        assert!(dir.path().join("state.json.corrupt").exists());
    }

    #[test]
    fn test_peek_leaves_corrupt_state_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 1024);
        assert_eq!(store.peek().unwrap(), PersistedState::default());

        store.save_current(&tracked("MyPhone")).unwrap();
        assert_eq!(store.peek().unwrap().device, Some(tracked("MyPhone")));

        fs::write(store.state_path(), "{not json").unwrap();
        assert!(matches!(store.peek(), Err(Error::StateDecode { .. })));
        assert_eq!(fs::read_to_string(store.state_path()).unwrap(), "{not json");
        assert!(!dir.path().join("state.json.corrupt").exists());
    }

    #[test]
    fn test_record_managed_appends_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 1024 * 1024);

        let a = DeviceIdentity::new("Phone A", "10.0.0.5", None);
        let b = DeviceIdentity::new("Phone B", "10.0.0.6", None);
        assert!(store.record_managed(&a).unwrap());
        assert!(!store.record_managed(&a).unwrap());
        assert!(store.record_managed(&b).unwrap());

        assert_eq!(store.managed_devices().unwrap(), vec![a, b]);
        let lines = fs::read_to_string(store.log_path()).unwrap().lines().count();
        assert_eq!(lines, 2);
    }

    #[test]
    fn test_managed_devices_dedups_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 1024 * 1024);
        let a = DeviceIdentity::new("Phone", "10.0.0.5", None);
        let line = serde_json::to_string(&a).unwrap();
        fs::write(store.log_path(), format!("{line}\ngarbage\n\n{line}\n")).unwrap();

        assert_eq!(store.managed_devices().unwrap(), vec![a]);
    }

    #[test]
    fn test_oversized_log_is_compacted() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 200);

        // Duplicates written by hand push the log over the limit.
        let a = DeviceIdentity::new("Phone A", "10.0.0.5", None);
        let line = serde_json::to_string(&a).unwrap();
        fs::write(store.log_path(), format!("{line}\n").repeat(5)).unwrap();

        let b = DeviceIdentity::new("Phone B", "10.0.0.6", None);
        assert!(store.record_managed(&b).unwrap());

        let contents = fs::read_to_string(store.log_path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(store.managed_devices().unwrap(), vec![a, b]);
        assert!(dir.path().join("managed_devices.jsonl.1").exists());
    }
}
