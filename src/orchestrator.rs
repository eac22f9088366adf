//! Orchestrator (spec §4.G): the daemon's top-level loop. Owns every
//! target's controller, the shared Watch Service, and reacts to config
//! hot-reloads by adding, removing, or updating controllers and watch
//! subscriptions in place.
//!
//! Plays the role of the teacher's `Supervisor` (`supervisor/mod.rs`): one
//! long-lived task that fans file-change events out to the right
//! per-target worker and owns the shutdown sequence.

use crate::config::Config;
use crate::config_diff::{self, ConfigDelta};
use crate::controller::{self, ControllerHandle, ControllerMessage};
use crate::paths::ProjectIdentity;
use crate::scheduler::Scheduler;
use crate::watch::WatchService;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

pub struct Orchestrator {
    identity: ProjectIdentity,
    state_dir: PathBuf,
    config: Config,
    scheduler: Arc<Scheduler>,
    controllers: HashMap<String, ControllerHandle>,
    watch_service: WatchService,
}

impl Orchestrator {
    pub async fn start(config: Config, identity: ProjectIdentity, state_dir: PathBuf) -> crate::error::Result<Self> {
        let scheduler = Arc::new(Scheduler::new(&config.build_scheduling()));
        let watch_settling = config
            .targets
            .iter()
            .map(|t| t.settling_delay_ms)
            .min()
            .unwrap_or(500);
        let mut watch_service = WatchService::connect(Duration::from_millis(watch_settling))?;

        clean_stale_locks(&config, &identity, &state_dir);

        let mut controllers = HashMap::new();
        for target in config.enabled_targets() {
            watch_service.subscribe(target, &identity.canonical_root)?;
            let handle = spawn_controller(target.clone(), &identity, &config.path, &state_dir, &scheduler, true);
            controllers.insert(target.name.clone(), handle);
        }

        Ok(Self { identity, state_dir, config, scheduler, controllers, watch_service })
    }

    /// Runs the event loop until `shutdown` resolves: dispatches watch
    /// events to controllers and applies config hot-reloads received on
    /// `reload_rx`.
    pub async fn run(
        mut self,
        mut reload_rx: mpsc::UnboundedReceiver<Config>,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) {
        // Spec §4.B `startHeartbeat`: every ~10s, every target's
        // `daemonProcess.lastHeartbeatAt` is refreshed so `polter` and
        // `poltergeist status` can tell a live daemon from a hung one.
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                changed = self.watch_service.next_changed_targets() => {
                    match changed {
                        Some(targets) => {
                            for (name, paths) in targets {
                                if let Some(handle) = self.controllers.get(&name) {
                                    handle.send(ControllerMessage::FileChanged(paths));
                                }
                            }
                        }
                        None => break,
                    }
                }
                new_config = reload_rx.recv() => {
                    match new_config {
                        Some(config) => self.apply_reload(config).await,
                        None => {}
                    }
                }
                _ = heartbeat.tick() => {
                    for handle in self.controllers.values() {
                        handle.send(ControllerMessage::Heartbeat);
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        self.shutdown().await;
    }

    /// Applies a hot-reloaded config: added targets start watching and
    /// building, removed targets stop and have their state purged, and
    /// modified targets are torn down and re-added rather than mutated live
    /// (spec §5 line 163: "treated as remove+add to avoid partial
    /// mutation" — an in-place update would leave an in-flight build
    /// running against the old command while the new one only took effect
    /// on the next cycle). A `schedulingChanged` reload re-parameterizes
    /// the shared `Scheduler` in place instead of replacing it, since every
    /// controller already holds a clone of the same `Arc`.
    ///
    /// If any subscription fails partway through, the previous
    /// configuration is kept (spec §5 line 167) — `self.config` is only
    /// advanced once every add/re-add in this reload succeeded.
    async fn apply_reload(&mut self, new_config: Config) {
        let delta: ConfigDelta = config_diff::diff(&self.config, &new_config);
        if delta.is_empty() && !delta.watchman_changed && !delta.scheduling_changed {
            self.config = new_config;
            return;
        }

        let mut applied_cleanly = true;

        for name in &delta.removed {
            if let Some(handle) = self.controllers.remove(name) {
                handle.shutdown().await;
            }
            self.watch_service.unsubscribe(name);
            if let Ok(identity_path) = self.target_state_path(name) {
                let _ = crate::state_store::remove(&identity_path);
            }
        }

        for target in &delta.added {
            match self.watch_service.subscribe(target, &self.identity.canonical_root) {
                Ok(()) => {
                    let handle = spawn_controller(
                        target.clone(),
                        &self.identity,
                        &new_config.path,
                        &self.state_dir,
                        &self.scheduler,
                        true,
                    );
                    self.controllers.insert(target.name.clone(), handle);
                }
                Err(e) => {
                    log::warn!("failed to subscribe new target '{}': {e}", target.name);
                    applied_cleanly = false;
                }
            }
        }

        for modified in &delta.modified {
            log::info!(
                "reloading target '{}' (watch changed: {}, build changed: {})",
                modified.name,
                modified.watch_changed,
                modified.build_changed
            );
            if let Some(handle) = self.controllers.remove(&modified.name) {
                handle.shutdown().await;
            }
            self.watch_service.unsubscribe(&modified.name);
            match self.watch_service.subscribe(&modified.current, &self.identity.canonical_root) {
                Ok(()) => {
                    let handle = spawn_controller(
                        modified.current.clone(),
                        &self.identity,
                        &new_config.path,
                        &self.state_dir,
                        &self.scheduler,
                        true,
                    );
                    self.controllers.insert(modified.name.clone(), handle);
                }
                Err(e) => {
                    log::warn!("failed to re-subscribe modified target '{}': {e}", modified.name);
                    applied_cleanly = false;
                }
            }
        }

        if delta.scheduling_changed {
            self.scheduler.reparameterize(&new_config.build_scheduling());
        }

        if !applied_cleanly {
            log::warn!("config reload applied partially; keeping previous configuration recorded");
            return;
        }

        self.config = new_config;
    }

    fn target_state_path(&self, target: &str) -> std::io::Result<PathBuf> {
        Ok(self.identity.state_file_path(&self.state_dir, target))
    }

    async fn shutdown(self) {
        for (_, handle) in self.controllers {
            handle.shutdown().await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_controller(
    target: crate::target::Target,
    identity: &ProjectIdentity,
    config_path: &std::path::Path,
    state_dir: &std::path::Path,
    scheduler: &Arc<Scheduler>,
    run_initial_build: bool,
) -> ControllerHandle {
    let state_path = identity.state_file_path(state_dir, &target.name);
    let lock_path = identity.lock_file_path(state_dir, &target.name);
    let log_path = state_dir.join(format!("{}.log", target.name));
    controller::spawn(
        target,
        identity.canonical_root.clone(),
        identity.project_name.clone(),
        config_path.to_path_buf(),
        state_path,
        lock_path,
        log_path,
        scheduler.clone(),
        run_initial_build,
    )
}

/// Removes stale build locks left behind by a crashed daemon before any
/// controller starts (spec §4.C: a lock whose holder is dead or whose
/// heartbeat has gone quiet for too long is abandoned, not held).
fn clean_stale_locks(config: &Config, identity: &ProjectIdentity, state_dir: &std::path::Path) {
    let now = chrono::Utc::now();
    for target in config.enabled_targets() {
        let lock_path = identity.lock_file_path(state_dir, &target.name);
        if lock_path.exists() && !crate::build_lock::is_held(&lock_path, now) {
            let _ = crate::build_lock::force_unlock(&lock_path);
        }
    }
}
