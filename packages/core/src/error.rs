//! Unified error types for the mountlink-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Failed to read the configuration file.
    #[snafu(display("failed to read config at {}", path.display()))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for our schema.
    #[snafu(display("failed to parse config at {}", path.display()))]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Configuration parsed but holds an unusable value.
    #[snafu(display("invalid configuration: {message}"))]
    ConfigInvalid { message: String },

    /// Home directory not found.
    #[snafu(display("could not determine home directory"))]
    HomeDirNotFound,

    /// Failed to read the persisted state or the managed devices log.
    #[snafu(display("failed to read state at {}", path.display()))]
    StateRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the persisted state.
    #[snafu(display("failed to write state at {}", path.display()))]
    StateWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The state file exists but is not valid JSON.
    #[snafu(display("state file {} is corrupt", path.display()))]
    StateDecode {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to serialize a state record.
    #[snafu(display("failed to encode state record"))]
    StateEncode { source: serde_json::Error },

    /// Failed to append to the managed devices log.
    #[snafu(display("failed to append to managed devices log at {}", path.display()))]
    LogAppend {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Bookmark file exists but cannot be read.
    #[snafu(display("failed to read bookmarks at {}", path.display()))]
    BookmarkRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to rewrite the bookmark file.
    #[snafu(display("failed to write bookmarks at {}", path.display()))]
    BookmarkWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Device directory creation failed.
    #[snafu(display("failed to create device directory at {}", path.display()))]
    DeviceDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to open the instance lock file.
    #[snafu(display("failed to open lock file at {}", path.display()))]
    LockOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Another daemon already holds the instance lock.
    #[snafu(display("another instance is already running (lock held on {})", path.display()))]
    AlreadyRunning { path: PathBuf },

    /// flock(2) failed for a reason other than contention.
    #[snafu(display("failed to lock {}: {source}", path.display()))]
    LockAcquire {
        path: PathBuf,
        source: nix::errno::Errno,
    },

    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// A bounded operation did not finish in time.
    #[snafu(display("{operation} timed out after {timeout:?}"))]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// An earlier attempt of a bounded operation has not returned yet.
    #[snafu(display("{operation} is still blocked from an earlier attempt"))]
    StillPending { operation: String },

    /// A program required at startup is not installed.
    #[snafu(display("required program '{tool}' not found"))]
    MissingDependency { tool: String },

    /// Failed to set up log output.
    #[snafu(display("failed to initialize logging: {message}"))]
    LoggingInit { message: String },

    #[snafu(whatever, display("{message}"))]
    Generic {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for state read errors.
    fn state_read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for state write errors.
    fn state_write_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for managed log append errors.
    fn log_append_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for bookmark read errors.
    fn bookmark_read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for bookmark write errors.
    fn bookmark_write_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for device directory creation errors.
    fn device_dir_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn state_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(StateReadSnafu { path: path.into() })
    }

    fn state_write_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(StateWriteSnafu { path: path.into() })
    }

    fn log_append_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(LogAppendSnafu { path: path.into() })
    }

    fn bookmark_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(BookmarkReadSnafu { path: path.into() })
    }

    fn bookmark_write_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(BookmarkWriteSnafu { path: path.into() })
    }

    fn device_dir_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(DeviceDirSnafu { path: path.into() })
    }
}
