//! mountlink-core: device links for GVfs phone mounts.
//!
//! Watches the GVfs mount root for an SFTP mount exported by a phone and, while
//! one is present, keeps a directory of symlinks to its storage roots plus
//! matching file-manager bookmarks. All artifacts are removed again when the
//! mount goes away, when another device takes its place, or on the next start
//! after a crash.
//!
//! # Modules
//!
//! - [`lifecycle`]: The connect/disconnect state machine ([`DeviceManager`])
//! - [`daemon`]: Instance lock plus polling loop
//! - [`detect`]: Mount discovery under the GVfs root
//! - [`storage`]: Storage roots on a mounted device
//! - [`symlink`]: Device directory links
//! - [`bookmark`]: GTK bookmark entries
//! - [`state`]: Persisted state and managed devices log
//! - [`safety`]: Deletion guard
//! - [`config`], [`logging`], [`error`]: Ambient plumbing
//!
//! # Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use mountlink_core::{Config, DeviceManager};
//!
//! let config = Config::load(None).unwrap();
//! let mut manager = DeviceManager::new(config);
//!
//! // One poll: connects, disconnects or swaps as needed.
//! let transition = manager.tick().unwrap();
//! println!("{transition:?}");
//!
//! // Or poll until told to stop.
//! let shutdown = AtomicBool::new(false);
//! manager.run(&shutdown);
//! ```

pub mod bookmark;
pub mod config;
pub mod daemon;
pub mod detect;
pub mod error;
pub mod executor;
pub mod fsio;
pub mod identity;
pub mod lifecycle;
pub mod lock;
pub mod logging;
pub mod notify;
pub mod resolver;
pub mod safety;
pub mod state;
pub mod storage;
pub mod symlink;
pub mod timeout;

// Re-export commonly used types
pub use config::Config;
pub use detect::MountHandle;
pub use error::{Error, Result};
pub use identity::DeviceIdentity;
pub use lifecycle::{DeviceManager, Transition};
pub use state::{PersistedState, TrackedDevice};
