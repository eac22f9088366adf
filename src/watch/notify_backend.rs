//! Low-level debounced file watching, carried over from the teacher's
//! `watch_files.rs` essentially unchanged: glob-pattern expansion to
//! directories-to-watch, and globset-based pattern matching on changed
//! paths. [`super::WatchService`] builds the per-target subscription model
//! on top of this.

use glob::glob;
use itertools::Itertools;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer_opt, DebounceEventResult, Debouncer, FileIdMap};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct WatchFiles {
    pub rx: tokio::sync::mpsc::Receiver<Vec<PathBuf>>,
    debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
}

impl WatchFiles {
    pub fn new(duration: Duration) -> crate::error::Result<Self> {
        let handle = tokio::runtime::Handle::current();
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let debouncer = new_debouncer_opt(
            duration,
            None,
            move |res: DebounceEventResult| {
                let tx = tx.clone();
                handle.spawn(async move {
                    if let Ok(events) = res {
                        let paths = events
                            .into_iter()
                            .filter(|e| is_relevant_event(e) && !any_path_is_directory(&e.paths))
                            .flat_map(|e| e.paths.clone())
                            .unique()
                            .collect_vec();
                        if !paths.is_empty() {
                            let _ = tx.send(paths).await;
                        }
                    }
                });
            },
            FileIdMap::new(),
            Config::default(),
        )
        .map_err(|e| crate::error::WatchError::ConnectFailed(e.to_string()))?;

        Ok(Self { debouncer, rx })
    }

    pub fn watch(&mut self, path: &Path, recursive_mode: RecursiveMode) -> notify::Result<()> {
        self.debouncer.watch(path, recursive_mode)
    }

    pub fn unwatch(&mut self, path: &Path) -> notify::Result<()> {
        self.debouncer.unwatch(path)
    }
}

/// Directory-change events (a file created/removed inside a watched dir,
/// reported against the directory itself rather than the file) are dropped
/// before debouncing, per the decision that only file-content changes
/// should trigger a rebuild (spec §9 open question). Deletions are dropped
/// too: spec §4.D's semantic filter drops any entry with `exists == false`,
/// and a `Remove` event is exactly that — the path no longer exists.
fn is_relevant_event(event: &notify_debouncer_full::DebouncedEvent) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
}

fn any_path_is_directory(paths: &[PathBuf]) -> bool {
    paths.iter().any(|p| p.is_dir())
}

pub fn normalize_watch_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            crate::env::CWD.join(path)
        }
    })
}

/// Expands glob patterns to the set of directories that need a `notify`
/// subscription, resolved relative to `base_dir`.
pub fn expand_watch_patterns(patterns: &[String], base_dir: &Path) -> HashSet<PathBuf> {
    let mut dirs_to_watch = HashSet::new();

    for pattern in patterns {
        let normalized_pattern = pattern.strip_prefix("./").unwrap_or(pattern);

        let full_pattern = if Path::new(normalized_pattern).is_absolute() {
            normalize_path_for_glob(normalized_pattern)
        } else {
            normalize_path_for_glob(&base_dir.join(normalized_pattern).to_string_lossy())
        };

        match glob(&full_pattern) {
            Ok(paths) => {
                for entry in paths.flatten() {
                    if let Some(parent) = entry.parent() {
                        dirs_to_watch.insert(normalize_watch_path(parent));
                    }
                }
            }
            Err(e) => {
                log::warn!("invalid glob pattern '{pattern}': {e}");
            }
        }

        if normalized_pattern.contains('*') {
            let normalized_pattern_str = normalize_path_for_glob(normalized_pattern);
            let parts: Vec<&str> = normalized_pattern_str.split('/').collect();
            let mut base = base_dir.to_path_buf();
            for part in parts {
                if part.contains('*') {
                    break;
                }
                base = base.join(part);
            }
            let dir_to_watch = if base.is_dir() { base } else { base_dir.to_path_buf() };
            dirs_to_watch.insert(normalize_watch_path(&dir_to_watch));
        } else {
            let full_path = if Path::new(normalized_pattern).is_absolute() {
                PathBuf::from(normalized_pattern)
            } else {
                base_dir.join(normalized_pattern)
            };
            if let Some(parent) = full_path.parent() {
                let dir_to_watch = if parent.is_dir() { parent.to_path_buf() } else { base_dir.to_path_buf() };
                dirs_to_watch.insert(normalize_watch_path(&dir_to_watch));
            }
        }
    }

    dirs_to_watch
}

fn normalize_path_for_glob(path: &str) -> String {
    path.replace('\\', "/")
}

/// Checks whether `changed_path` matches any of `patterns`, using globset
/// so that `**` correctly matches any recursion depth.
pub fn path_matches_patterns(changed_path: &Path, patterns: &[String], base_dir: &Path) -> bool {
    let changed_path_str = normalize_path_for_glob(&changed_path.to_string_lossy());

    for pattern in patterns {
        let normalized_pattern = pattern.strip_prefix("./").unwrap_or(pattern);

        let full_pattern = if Path::new(normalized_pattern).is_absolute() {
            normalize_path_for_glob(normalized_pattern)
        } else {
            normalize_path_for_glob(&base_dir.join(normalized_pattern).to_string_lossy())
        };

        let glob = globset::GlobBuilder::new(&full_pattern)
            .case_insensitive(cfg!(target_os = "windows"))
            .literal_separator(true)
            .build();

        if let Ok(glob) = glob {
            let matcher = glob.compile_matcher();
            if matcher.is_match(&changed_path_str) {
                return true;
            }
        }
    }
    false
}
