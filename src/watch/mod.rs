//! Watch Service (spec §4.D): maps filesystem change events to the set of
//! target names whose watch patterns match, after excludePaths and the
//! directory-event filter have been applied.
//!
//! Generalizes the teacher's single implicit watch list (one daemon, one
//! set of watched files) into a registry of per-target subscriptions
//! sharing one underlying debouncer, since a single Poltergeist daemon
//! watches many targets at once.

mod notify_backend;

use crate::error::{Result, WatchError};
use crate::target::Target;
use notify::RecursiveMode;
use notify_backend::WatchFiles;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

struct Subscription {
    project_root: PathBuf,
    watch_paths: Vec<String>,
    exclude_paths: Vec<String>,
    watched_dirs: HashSet<PathBuf>,
}

/// Owns the single `notify` debouncer for the daemon and the per-target
/// subscription registry layered on top of it.
pub struct WatchService {
    watcher: WatchFiles,
    subscriptions: HashMap<String, Subscription>,
}

impl WatchService {
    pub fn connect(settling_delay: Duration) -> Result<Self> {
        let watcher = WatchFiles::new(settling_delay)?;
        Ok(Self {
            watcher,
            subscriptions: HashMap::new(),
        })
    }

    /// Subscribes `target` to its configured watch paths under
    /// `project_root`. Replaces any existing subscription for the same
    /// target name (used both for first-time setup and hot-reload
    /// refresh).
    pub fn subscribe(&mut self, target: &Target, project_root: &Path) -> Result<()> {
        if let Some(existing) = self.subscriptions.remove(&target.name) {
            self.unwatch_unshared(target.name.as_str(), existing.watched_dirs);
        }

        let watched_dirs = notify_backend::expand_watch_patterns(&target.watch_paths, project_root);
        for dir in &watched_dirs {
            if self.ref_count(dir) == 0 {
                self.watcher
                    .watch(dir, RecursiveMode::Recursive)
                    .map_err(|source| WatchError::SubscribeFailed {
                        target: target.name.clone(),
                        source,
                    })?;
            }
        }

        self.subscriptions.insert(
            target.name.clone(),
            Subscription {
                project_root: project_root.to_path_buf(),
                watch_paths: target.watch_paths.clone(),
                exclude_paths: target.exclude_paths.clone(),
                watched_dirs,
            },
        );
        Ok(())
    }

    pub fn unsubscribe(&mut self, target_name: &str) {
        if let Some(sub) = self.subscriptions.remove(target_name) {
            self.unwatch_unshared(target_name, sub.watched_dirs);
        }
    }

    fn ref_count(&self, dir: &Path) -> usize {
        self.subscriptions.values().filter(|s| s.watched_dirs.contains(dir)).count()
    }

    fn unwatch_unshared(&mut self, removed_target: &str, dirs: HashSet<PathBuf>) {
        let _ = removed_target;
        for dir in dirs {
            if self.ref_count(&dir) == 0 {
                let _ = self.watcher.unwatch(&dir);
            }
        }
    }

    /// Waits for the next debounced batch of changed paths and returns, for
    /// every subscribed target whose patterns match at least one changed
    /// path not covered by its `excludePaths`, that target's name paired
    /// with the subset of changed paths it matched (relative to its project
    /// root when possible, for the build log — spec §4.E's "set of changed
    /// paths, for logging only"). Returns `None` once the underlying
    /// channel closes (daemon shutdown).
    pub async fn next_changed_targets(&mut self) -> Option<Vec<(String, Vec<PathBuf>)>> {
        let paths = self.watcher.rx.recv().await?;
        let mut matched = Vec::new();
        for (name, sub) in &self.subscriptions {
            let hits: Vec<PathBuf> = paths
                .iter()
                .filter(|p| {
                    notify_backend::path_matches_patterns(p, &sub.watch_paths, &sub.project_root)
                        && !notify_backend::path_matches_patterns(p, &sub.exclude_paths, &sub.project_root)
                })
                .map(|p| p.strip_prefix(&sub.project_root).map(Path::to_path_buf).unwrap_or_else(|_| p.clone()))
                .collect();
            if !hits.is_empty() {
                matched.push((name.clone(), hits));
            }
        }
        Some(matched)
    }

    pub fn subscribed_targets(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(|s| s.as_str())
    }
}
