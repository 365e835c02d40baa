//! Daemon entry point.

use std::sync::atomic::AtomicBool;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::executor;
use crate::lifecycle::DeviceManager;
use crate::lock::InstanceLock;

/// Runs the polling daemon until `shutdown` is set.
///
/// Takes the instance lock first, so a second daemon fails with
/// [`Error::AlreadyRunning`](crate::Error::AlreadyRunning) before touching any
/// state. The lock is held until this function returns.
pub fn run(config: Config, shutdown: &AtomicBool) -> Result<()> {
    let lock = InstanceLock::acquire(&config.lock_path())?;
    info!(lock = %lock.path().display(), pid = std::process::id(), "instance lock acquired");

    executor::ensure_dependencies(&config)?;

    let mut manager = DeviceManager::new(config);
    manager.run(shutdown);

    drop(lock);
    Ok(())
}

/// Removes the artifacts of every managed device, then exits.
///
/// Refuses to run while a daemon holds the instance lock.
pub fn cleanup(config: Config) -> Result<usize> {
    let _lock = InstanceLock::acquire(&config.lock_path())?;
    DeviceManager::new(config).reconcile_and_cleanup_all()
}
