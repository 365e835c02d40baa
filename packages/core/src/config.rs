//! Daemon configuration.
//!
//! Loaded from `$XDG_CONFIG_HOME/mountlink/config.toml` unless another path is
//! given. Every field has a default, so a missing file or a partial file is
//! fine. Paths starting with `~` are expanded against the home directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::debug;

use crate::error::{ConfigParseSnafu, ConfigReadSnafu, Error, Result};
use crate::storage::StorageKind;

/// Environment variable naming an alternate config file.
pub const CONFIG_ENV: &str = "MOUNTLINK_CONFIG";

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between two polls of the mount root.
    pub poll_interval_secs: u64,
    /// Directory under which device mounts appear.
    pub mount_root: PathBuf,
    /// Directory holding one sub-directory of symlinks per device.
    pub base_dir: PathBuf,
    /// Directory for the state file, managed devices log and lock file.
    pub state_dir: PathBuf,
    /// Size above which the managed devices log is compacted.
    pub managed_log_max_bytes: u64,
    pub bookmarks: BookmarkConfig,
    pub storage: StorageConfig,
    pub timeouts: TimeoutConfig,
    pub resolver: ResolverConfig,
    pub notifications: NotificationConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        let uid = nix::unistd::getuid();
        Self {
            poll_interval_secs: 5,
            mount_root: PathBuf::from(format!("/run/user/{uid}/gvfs")),
            base_dir: PathBuf::from("~/Devices"),
            state_dir: PathBuf::from("~/.local/state/mountlink"),
            managed_log_max_bytes: 64 * 1024,
            bookmarks: BookmarkConfig::default(),
            storage: StorageConfig::default(),
            timeouts: TimeoutConfig::default(),
            resolver: ResolverConfig::default(),
            notifications: NotificationConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Loads the config from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults. The result has its `~` paths expanded
    /// and has been validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .or_else(Self::default_path),
        };

        let mut config = match path {
            Some(path) if path.exists() => {
                debug!("Loading config from {:?}", path);
                let contents = fs::read_to_string(&path).context(ConfigReadSnafu { path: &path })?;
                toml::from_str(&contents).context(ConfigParseSnafu { path: &path })?
            }
            _ => Config::default(),
        };

        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }

    /// Default config path: `$XDG_CONFIG_HOME/mountlink/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("mountlink").join("config.toml"))
    }

    /// Renders the default configuration as TOML.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }

    /// Replaces a leading `~` in every configured path with the home directory.
    pub fn expand_paths(&mut self) -> Result<()> {
        for path in [
            &mut self.mount_root,
            &mut self.base_dir,
            &mut self.state_dir,
            &mut self.bookmarks.file,
            &mut self.log.directory,
        ] {
            *path = expand_tilde(path)?;
        }
        Ok(())
    }

    /// Rejects values the daemon cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::ConfigInvalid {
                message: "poll_interval_secs must be at least 1".to_string(),
            });
        }
        if !self.base_dir.is_absolute() {
            return Err(Error::ConfigInvalid {
                message: format!("base_dir {} must be absolute", self.base_dir.display()),
            });
        }
        let home = dirs::home_dir();
        if self.base_dir == Path::new("/") || home.as_deref() == Some(self.base_dir.as_path()) {
            return Err(Error::ConfigInvalid {
                message: format!(
                    "base_dir {} must be a dedicated directory",
                    self.base_dir.display()
                ),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Path of the single-instance lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("mountlink.lock")
    }
}

/// Bookmark file settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkConfig {
    pub enabled: bool,
    /// GTK-style bookmark list, one `<uri> <label>` per line.
    pub file: PathBuf,
}

impl Default for BookmarkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: PathBuf::from("~/.config/gtk-3.0/bookmarks"),
        }
    }
}

/// Storage paths, relative to the mount point, grouped by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub internal: Vec<PathBuf>,
    pub external: Vec<PathBuf>,
    pub usb: Vec<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            internal: vec![PathBuf::from("storage/emulated/0")],
            external: Vec::new(),
            usb: Vec::new(),
        }
    }
}

impl StorageConfig {
    /// Configured paths of one kind, in configuration order.
    pub fn paths(&self, kind: StorageKind) -> &[PathBuf] {
        match kind {
            StorageKind::Internal => &self.internal,
            StorageKind::External => &self.external,
            StorageKind::Usb => &self.usb,
        }
    }
}

/// Limits for operations that may touch an unresponsive mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub scan_secs: u64,
    pub resolve_secs: u64,
    pub storage_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            scan_secs: 5,
            resolve_secs: 5,
            storage_secs: 5,
        }
    }
}

impl TimeoutConfig {
    pub fn scan(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn resolve(&self) -> Duration {
        Duration::from_secs(self.resolve_secs)
    }

    pub fn storage(&self) -> Duration {
        Duration::from_secs(self.storage_secs)
    }
}

/// External display-name lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Program and arguments; `{host}` is replaced by the connection host.
    /// Empty means the host itself is used as the display name.
    pub command: Vec<String>,
}

/// Desktop notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    /// Program and leading arguments; summary and body are appended.
    pub command: Vec<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec!["notify-send".to_string(), "--app-name=mountlink".to_string()],
        }
    }
}

/// How often the log file is rolled over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `mountlink_core=debug`.
    pub level: String,
    pub directory: PathBuf,
    pub rotation: LogRotation,
    /// Number of rotated log files kept.
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: PathBuf::from("~/.local/state/mountlink/logs"),
            rotation: LogRotation::Daily,
            max_files: 7,
        }
    }
}

/// Expands a leading `~` component to the home directory.
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir().ok_or(Error::HomeDirNotFound)?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
poll_interval_secs = 2
base_dir = "/srv/devices"

[storage]
internal = ["data"]
usb = ["usb/0"]
"#,
        )
        .unwrap();

        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.base_dir, PathBuf::from("/srv/devices"));
        assert_eq!(config.storage.internal, vec![PathBuf::from("data")]);
        assert!(config.storage.external.is_empty());
        assert_eq!(config.storage.usb, vec![PathBuf::from("usb/0")]);
        assert!(config.bookmarks.enabled);
        assert_eq!(config.timeouts, TimeoutConfig::default());
        assert_eq!(config.log.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_default_toml_roundtrips() {
        let rendered = Config::default_toml();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().expect("Home directory should exist in test environment");
        assert_eq!(
            expand_tilde(Path::new("~/Devices")).unwrap(),
            home.join("Devices")
        );
        assert_eq!(
            expand_tilde(Path::new("/abs/path")).unwrap(),
            PathBuf::from("/abs/path")
        );
        // Only a whole leading component is expanded.
        assert_eq!(
            expand_tilde(Path::new("~user/x")).unwrap(),
            PathBuf::from("~user/x")
        );
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert!(config.base_dir.is_absolute());
    }

    #[test]
    fn test_load_rejects_zero_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "poll_interval_secs = 0\nbase_dir = \"/srv/devices\"\n").unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(Error::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_root_base_dir() {
        let config = Config {
            base_dir: PathBuf::from("/"),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "poll_interval_secs = \"soon\"\n").unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(Error::ConfigParse { .. })
        ));
    }
}
