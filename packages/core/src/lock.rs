//! Single-instance guard.
//!
//! The daemon holds an exclusive `flock(2)` on a well-known file for its whole
//! lifetime. The kernel drops the lock when the process exits, however it
//! exits, so a crash never leaves a stale lock behind.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::error::{Error, Result};

/// An acquired instance lock; released on drop.
pub struct InstanceLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl InstanceLock {
    /// Takes the lock without waiting.
    ///
    /// Fails with [`Error::AlreadyRunning`] when another process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::LockOpen {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::LockOpen {
                path: path.to_path_buf(),
                source,
            })?;

        let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => {
                return Err(Error::AlreadyRunning {
                    path: path.to_path_buf(),
                });
            }
            Err((_, errno)) => {
                return Err(Error::LockAcquire {
                    path: path.to_path_buf(),
                    source: errno,
                });
            }
        };

        // The PID is informational only; the lock is what counts.
        let mut handle: &File = &lock;
        let written = handle
            .set_len(0)
            .and_then(|()| writeln!(handle, "{}", std::process::id()));
        if let Err(e) = written {
            debug!(path = %path.display(), error = %e, "could not record pid in lock file");
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
