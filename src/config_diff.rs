//! Config hot-reload diffing (spec §4.I, §5): computes what changed between
//! two loaded configs so the Orchestrator can apply the minimal set of
//! controller/watch-subscription updates instead of restarting everything.

use crate::config::Config;
use crate::target::Target;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDelta {
    /// Targets present in the new config but not the old one.
    pub added: Vec<Target>,
    /// Target names present in the old config but not the new one.
    pub removed: Vec<String>,
    /// Targets present in both, where some field differs.
    pub modified: Vec<ModifiedTarget>,
    /// True iff the top-level `watchman` tuning section differs (spec
    /// §4.I `watchChanged`).
    pub watchman_changed: bool,
    /// True iff `buildScheduling` differs (spec §4.I `schedulingChanged`):
    /// the Orchestrator re-parameterizes its `Scheduler` when this is set.
    pub scheduling_changed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModifiedTarget {
    pub name: String,
    pub previous: Target,
    pub current: Target,
    /// True when `watchPaths` or `excludePaths` changed, meaning the Watch
    /// Service subscription must be replaced.
    pub watch_changed: bool,
    /// True when anything else relevant to the build itself changed
    /// (buildCommand, environment, timeoutMs, settlingDelayMs, maxRetries,
    /// enabled), meaning the controller's cached command must be replaced.
    pub build_changed: bool,
}

impl ConfigDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Diffs `previous` against `current` by target name, per spec §5's
/// hot-reload rule: added targets start watching, removed targets stop and
/// are purged from the state store, modified targets are torn down and
/// re-added (never mutated in place). Also flags whether the global
/// `watchman`/`buildScheduling` sections changed.
pub fn diff(previous: &Config, current: &Config) -> ConfigDelta {
    let prev_by_name = previous.targets_by_name();
    let curr_by_name = current.targets_by_name();

    let mut delta = ConfigDelta {
        watchman_changed: previous.watchman != current.watchman,
        scheduling_changed: previous.build_scheduling() != current.build_scheduling(),
        ..ConfigDelta::default()
    };

    for (name, target) in &curr_by_name {
        if !prev_by_name.contains_key(name) {
            delta.added.push(target.clone());
        }
    }

    for name in prev_by_name.keys() {
        if !curr_by_name.contains_key(name) {
            delta.removed.push(name.clone());
        }
    }

    for (name, current_target) in &curr_by_name {
        if let Some(previous_target) = prev_by_name.get(name) {
            if previous_target != current_target {
                let watch_changed = previous_target.watch_paths != current_target.watch_paths
                    || previous_target.exclude_paths != current_target.exclude_paths;
                let build_changed = previous_target.build_command != current_target.build_command
                    || previous_target.environment != current_target.environment
                    || previous_target.timeout_ms != current_target.timeout_ms
                    || previous_target.settling_delay_ms != current_target.settling_delay_ms
                    || previous_target.max_retries != current_target.max_retries
                    || previous_target.enabled != current_target.enabled;
                delta.modified.push(ModifiedTarget {
                    name: name.clone(),
                    previous: previous_target.clone(),
                    current: current_target.clone(),
                    watch_changed,
                    build_changed,
                });
            }
        }
    }

    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetKind;
    use indexmap::IndexMap;
    use std::path::PathBuf;

    fn target(name: &str, command: &str) -> Target {
        Target {
            name: name.to_string(),
            kind: TargetKind::Executable,
            enabled: true,
            build_command: command.to_string(),
            output_path: None,
            watch_paths: vec!["src/**/*.rs".to_string()],
            exclude_paths: vec![],
            settling_delay_ms: 500,
            max_retries: 0,
            environment: IndexMap::new(),
            bundle_id: None,
            timeout_ms: None,
        }
    }

    fn config(targets: Vec<Target>) -> Config {
        Config {
            version: "1.0".to_string(),
            project_type: None,
            targets,
            watchman: None,
            build_scheduling: None,
            notifications: None,
            logging: None,
            path: PathBuf::new(),
        }
    }

    #[test]
    fn test_diff_detects_added_and_removed() {
        let prev = config(vec![target("a", "make a")]);
        let curr = config(vec![target("b", "make b")]);
        let delta = diff(&prev, &curr);
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].name, "b");
        assert_eq!(delta.removed, vec!["a".to_string()]);
        assert!(delta.modified.is_empty());
    }

    #[test]
    fn test_diff_detects_build_command_change() {
        let prev = config(vec![target("a", "make a")]);
        let curr = config(vec![target("a", "make a2")]);
        let delta = diff(&prev, &curr);
        assert_eq!(delta.modified.len(), 1);
        assert!(delta.modified[0].build_changed);
        assert!(!delta.modified[0].watch_changed);
    }

    #[test]
    fn test_diff_detects_watch_path_change() {
        let prev = config(vec![target("a", "make a")]);
        let mut changed = target("a", "make a");
        changed.watch_paths = vec!["src/**/*.c".to_string()];
        let curr = config(vec![changed]);
        let delta = diff(&prev, &curr);
        assert_eq!(delta.modified.len(), 1);
        assert!(delta.modified[0].watch_changed);
        assert!(!delta.modified[0].build_changed);
    }

    #[test]
    fn test_diff_no_changes_is_empty() {
        let prev = config(vec![target("a", "make a")]);
        let curr = config(vec![target("a", "make a")]);
        let delta = diff(&prev, &curr);
        assert!(delta.is_empty());
        assert!(!delta.watchman_changed);
        assert!(!delta.scheduling_changed);
    }

    #[test]
    fn test_diff_detects_scheduling_change() {
        let prev = config(vec![target("a", "make a")]);
        let mut curr = config(vec![target("a", "make a")]);
        curr.build_scheduling = Some(crate::config::BuildScheduling { parallelization: 4, prioritization: None });
        let delta = diff(&prev, &curr);
        assert!(delta.scheduling_changed);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_diff_detects_watchman_change() {
        let prev = config(vec![target("a", "make a")]);
        let mut curr = config(vec![target("a", "make a")]);
        curr.watchman = Some(crate::config::WatchmanTuning { use_default_exclusions: false, ..Default::default() });
        let delta = diff(&prev, &curr);
        assert!(delta.watchman_changed);
    }
}
