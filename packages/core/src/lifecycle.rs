//! Device lifecycle: connect, disconnect, swap and crash recovery.
//!
//! The manager is in one of two states, derived from the persisted state file:
//! idle (no tracked device) or connected (a tracked device with live
//! artifacts). Each poll tick compares the detected mount with the tracked
//! device and runs at most one transition.
//!
//! Connect order is discover, link, bookmark, log, persist: the state file
//! only names a device once its artifacts exist. Disconnect removes bookmarks
//! before symlinks, then the device directory if empty, then clears the state.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::bookmark::Bookmarks;
use crate::config::Config;
use crate::detect::{FsMountSource, MountHandle, MountSource};
use crate::error::{IoResultExt, Result};
use crate::identity::DeviceIdentity;
use crate::notify::{self, Notifier};
use crate::resolver::{self, NameResolver};
use crate::safety;
use crate::state::{PersistedState, StateStore, TrackedDevice};
use crate::storage;
use crate::symlink;
use crate::timeout::SingleFlight;

/// Longest single sleep between shutdown checks.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing mounted, nothing tracked.
    Idle,
    /// The tracked device is still mounted at the same place.
    Unchanged,
    /// A device was connected from idle.
    Connected(DeviceIdentity),
    /// The tracked device was re-linked after its mount moved.
    Refreshed(DeviceIdentity),
    /// A different device replaced the tracked one.
    Swapped {
        from: DeviceIdentity,
        to: DeviceIdentity,
    },
    /// The tracked device went away.
    Disconnected(DeviceIdentity),
    /// A mount is present but nothing could be linked; no device is tracked
    /// afterwards. If the same device was tracked before, its old links were
    /// removed.
    ConnectAborted(DeviceIdentity),
}

/// Drives the artifact lifecycle for the single tracked device.
pub struct DeviceManager {
    config: Config,
    store: StateStore,
    bookmarks: Bookmarks,
    source: Box<dyn MountSource>,
    resolver: Box<dyn NameResolver>,
    notifier: Box<dyn Notifier>,
    discovery: SingleFlight,
}

impl DeviceManager {
    /// Builds a manager with the collaborators described by `config`.
    pub fn new(config: Config) -> Self {
        let source = Box::new(FsMountSource::new(
            config.mount_root.clone(),
            config.timeouts.scan(),
        ));
        let resolver = resolver::from_config(&config);
        let notifier = notify::from_config(&config);
        Self::with_collaborators(config, source, resolver, notifier)
    }

    /// Builds a manager with explicit collaborators.
    pub fn with_collaborators(
        config: Config,
        source: Box<dyn MountSource>,
        resolver: Box<dyn NameResolver>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let store = StateStore::new(&config.state_dir, config.managed_log_max_bytes);
        let bookmarks = Bookmarks::new(config.bookmarks.file.clone(), config.bookmarks.enabled);
        Self {
            config,
            store,
            bookmarks,
            source,
            resolver,
            notifier,
            discovery: SingleFlight::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The persisted state as currently on disk. Read-only, so it is safe to
    /// call while a daemon is running.
    pub fn status(&self) -> Result<PersistedState> {
        self.store.peek()
    }

    /// Polls once and performs whatever transition the observation calls for.
    pub fn tick(&mut self) -> Result<Transition> {
        let tracked = self.store.current()?;
        let mount = self.source.detect();

        match (mount, tracked) {
            (None, None) => Ok(Transition::Idle),
            (None, Some(tracked)) => {
                info!(device = %tracked.identity.sanitized_name, "device mount disappeared");
                self.disconnect(&tracked)?;
                Ok(Transition::Disconnected(tracked.identity))
            }
            (Some(mount), Some(tracked)) if tracked.mount_path == mount.path => {
                Ok(Transition::Unchanged)
            }
            (Some(mount), tracked) => {
                let identity = self.identify(&mount);
                let mut swapped_from = None;
                let mut refreshed = None;
                match tracked {
                    Some(tracked) if !tracked.identity.same_device(&identity) => {
                        info!(
                            from = %tracked.identity.sanitized_name,
                            to = %identity.sanitized_name,
                            "a different device is mounted, cleaning up the old one first"
                        );
                        self.disconnect(&tracked)?;
                        swapped_from = Some(tracked.identity);
                    }
                    Some(tracked) => refreshed = Some(tracked),
                    None => {}
                }

                let Some(current) = self.connect(&mount, &identity)? else {
                    if let Some(stale) = refreshed {
                        info!(
                            device = %stale.identity.sanitized_name,
                            "device remounted without usable storage, removing old links"
                        );
                        self.disconnect(&stale)?;
                    }
                    return Ok(Transition::ConnectAborted(identity));
                };

                if let Some(previous) = refreshed {
                    self.prune_links(&previous, &current);
                    return Ok(Transition::Refreshed(identity));
                }
                Ok(match swapped_from {
                    Some(from) => Transition::Swapped { from, to: identity },
                    None => Transition::Connected(identity),
                })
            }
        }
    }

    /// Removes links (and their bookmarks) recorded for `previous` that the
    /// reconnect in `current` no longer produced.
    fn prune_links(&self, previous: &TrackedDevice, current: &TrackedDevice) {
        let stale: Vec<PathBuf> = previous
            .links
            .iter()
            .filter(|link| !current.links.contains(link))
            .cloned()
            .collect();
        if stale.is_empty() {
            return;
        }

        let name = &current.identity.sanitized_name;
        if let Err(e) = self.bookmarks.remove_links(name, &stale) {
            warn!(device = %name, error = %e, "failed to remove stale bookmarks");
        }
        let removed = symlink::remove_all(&stale, &self.config.base_dir);
        info!(device = %name, removed, "removed links to storage that is gone");
    }

    /// Resolves the identity of a mounted device, falling back to its host.
    fn identify(&self, mount: &MountHandle) -> DeviceIdentity {
        let display_name = match self.resolver.resolve(&mount.host) {
            Some(name) => name,
            None => {
                warn!(host = %mount.host, "could not resolve device name, using host");
                mount.host.clone()
            }
        };
        DeviceIdentity::new(display_name, mount.host.clone(), mount.port)
    }

    /// Runs the connect sequence. Returns `None` when nothing could be linked.
    ///
    /// Safe to repeat for the same device: links and bookmarks already in
    /// place are left as they are.
    pub fn connect(
        &self,
        mount: &MountHandle,
        identity: &DeviceIdentity,
    ) -> Result<Option<TrackedDevice>> {
        let entries = storage::discover_bounded(
            &mount.path,
            &self.config.storage,
            self.config.timeouts.storage(),
            &self.discovery,
        );
        if entries.is_empty() {
            info!(
                device = %identity.sanitized_name,
                mount = %mount.path.display(),
                "no usable storage on device yet"
            );
            return Ok(None);
        }

        let device_dir = self.device_dir(identity);
        fs::create_dir_all(&device_dir).device_dir_context(&device_dir)?;

        let report = symlink::sync(&device_dir, &entries);
        if report.created_count() == 0 {
            warn!(device = %identity.sanitized_name, "no storage entry could be linked");
            symlink::remove_dir_if_empty(&device_dir, &self.config.base_dir);
            return Ok(None);
        }

        if let Err(e) = self.bookmarks.add(identity, &report.linked) {
            warn!(device = %identity.sanitized_name, error = %e, "failed to add bookmarks");
        }
        if let Err(e) = self.store.record_managed(identity) {
            warn!(device = %identity.sanitized_name, error = %e, "failed to record managed device");
        }

        let tracked = TrackedDevice {
            identity: identity.clone(),
            mount_path: mount.path.clone(),
            links: report.link_paths(),
        };
        self.store.save_current(&tracked)?;

        info!(
            device = %identity.sanitized_name,
            host = %identity.host,
            links = report.created_count(),
            skipped = report.skipped.len(),
            "device connected"
        );
        self.notifier.notify(
            "Device connected",
            &format!("{} is available in {}", identity.display_name, device_dir.display()),
        );
        Ok(Some(tracked))
    }

    /// Removes the artifacts of `tracked` and clears the persisted state.
    pub fn disconnect(&self, tracked: &TrackedDevice) -> Result<()> {
        self.cleanup_artifacts(&tracked.identity, &tracked.links);
        self.store.clear()?;

        info!(device = %tracked.identity.sanitized_name, "device disconnected");
        self.notifier.notify(
            "Device disconnected",
            &format!("{} is no longer available", tracked.identity.display_name),
        );
        Ok(())
    }

    /// Removes bookmarks, then links, then the device directory if empty.
    ///
    /// Works on whatever is left of a partially removed artifact set; every
    /// step tolerates missing pieces.
    fn cleanup_artifacts(&self, identity: &DeviceIdentity, links: &[PathBuf]) {
        if let Err(e) = self.bookmarks.remove(&identity.sanitized_name) {
            warn!(device = %identity.sanitized_name, error = %e, "failed to remove bookmarks");
        }

        let device_dir = self.device_dir(identity);
        if !safety::guard_deletion(&device_dir, &self.config.base_dir) {
            return;
        }

        let removed = symlink::remove_all(links, &self.config.base_dir);
        debug!(device = %identity.sanitized_name, removed, "removed links");
        symlink::remove_dir_if_empty(&device_dir, &self.config.base_dir);
    }

    /// Links recorded for a device plus every link name the configuration
    /// could have produced for it.
    fn known_links(&self, identity: &DeviceIdentity, recorded: &[PathBuf]) -> Vec<PathBuf> {
        let device_dir = self.device_dir(identity);
        let mut links = recorded.to_vec();
        for label in storage::candidate_labels(&self.config.storage) {
            let link = device_dir.join(label);
            if !links.contains(&link) {
                links.push(link);
            }
        }
        links
    }

    fn device_dir(&self, identity: &DeviceIdentity) -> PathBuf {
        self.config.base_dir.join(&identity.sanitized_name)
    }

    /// Startup pass that repairs whatever a previous run left behind.
    ///
    /// The tracked device is cleaned up unless the same device is still
    /// mounted. Devices from the managed log that are neither tracked nor
    /// mounted get their artifacts removed as well, which covers a crash
    /// between linking and persisting. Idempotent.
    pub fn reconcile(&mut self) -> Result<()> {
        let tracked = self.store.current()?;
        let live = self.source.detect().map(|mount| self.identify(&mount));

        let mut keep = live.as_ref().map(|identity| identity.sanitized_name.clone());

        if let Some(tracked) = tracked {
            let still_here = live
                .as_ref()
                .is_some_and(|identity| identity.same_device(&tracked.identity));
            if still_here {
                debug!(device = %tracked.identity.sanitized_name, "tracked device still mounted");
                keep = Some(tracked.identity.sanitized_name.clone());
            } else {
                info!(
                    device = %tracked.identity.sanitized_name,
                    "cleaning up device left over from a previous run"
                );
                let links = self.known_links(&tracked.identity, &tracked.links);
                self.cleanup_artifacts(&tracked.identity, &links);
                self.store.clear()?;
            }
        }

        for identity in self.store.managed_devices()? {
            if keep.as_deref() == Some(identity.sanitized_name.as_str()) {
                continue;
            }
            let links = self.known_links(&identity, &[]);
            self.cleanup_artifacts(&identity, &links);
        }

        Ok(())
    }

    /// Removes the artifacts of every device ever managed and clears the state.
    ///
    /// Used by the uninstall flow. Returns the number of devices processed.
    pub fn reconcile_and_cleanup_all(&self) -> Result<usize> {
        let mut devices: Vec<(DeviceIdentity, Vec<PathBuf>)> = Vec::new();
        if let Some(tracked) = self.store.current()? {
            devices.push((tracked.identity, tracked.links));
        }
        for identity in self.store.managed_devices()? {
            if !devices.iter().any(|(d, _)| d.same_device(&identity)) {
                devices.push((identity, Vec::new()));
            }
        }

        for (identity, recorded) in &devices {
            info!(device = %identity.sanitized_name, "removing artifacts");
            let links = self.known_links(identity, recorded);
            self.cleanup_artifacts(identity, &links);
        }
        self.store.clear()?;

        Ok(devices.len())
    }

    /// Reconciles, then polls until `shutdown` is set.
    ///
    /// A failing tick is logged and the loop carries on.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!(
            mount_root = %self.config.mount_root.display(),
            base_dir = %self.config.base_dir.display(),
            interval = ?self.config.poll_interval(),
            "watching for devices"
        );

        if let Err(e) = self.reconcile() {
            error!(error = %e, "startup reconciliation failed");
        }

        while !shutdown.load(Ordering::SeqCst) {
            match self.tick() {
                Ok(Transition::Idle | Transition::Unchanged) => {}
                Ok(transition) => debug!(?transition, "tick"),
                Err(e) => error!(error = %e, "poll iteration failed"),
            }
            sleep_unless_shutdown(self.config.poll_interval(), shutdown);
        }

        info!("shutting down");
    }
}

/// Sleeps for `duration`, waking early once `shutdown` is set.
fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
