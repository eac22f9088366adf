//! Typed error taxonomy (spec §7) with rich diagnostics via `miette`.
//!
//! Library code returns these typed errors; only the CLI layer (`src/cli/`)
//! translates them into user-facing messages and process exit codes.

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    StateStore(#[from] StateStoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Polter(#[from] PolterError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors (spec §7.1): invalid schema, unknown key, duplicate
/// target name, unknown target kind. Fatal on initial load; logged and
/// ignored (keeping the previous config) on reload.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("config file not found: {}", path.display())]
    #[diagnostic(
        code(poltergeist::config::not_found),
        help("create a poltergeist.config.json in this directory or a parent")
    )]
    NotFound { path: std::path::PathBuf },

    #[error("failed to parse config: {}", path.display())]
    #[diagnostic(code(poltergeist::config::parse_error))]
    ParseError {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported config version '{found}', expected '1.0'")]
    #[diagnostic(
        code(poltergeist::config::bad_version),
        help("only version \"1.0\" is currently accepted")
    )]
    UnsupportedVersion { found: String },

    #[error("duplicate target name '{name}'")]
    #[diagnostic(
        code(poltergeist::config::duplicate_target),
        help("target names must be unique within a project")
    )]
    DuplicateTarget { name: String },

    #[error("invalid target name '{name}'")]
    #[diagnostic(
        code(poltergeist::config::invalid_target_name),
        help("target names must match ^[A-Za-z0-9][A-Za-z0-9_-]*$")
    )]
    InvalidTargetName { name: String },

    #[error("unknown target kind '{kind}' for target '{name}'")]
    #[diagnostic(
        code(poltergeist::config::unknown_kind),
        help(
            "kind must be one of: executable, app-bundle, library, framework, test, container-image, custom"
        )
    )]
    UnknownKind { name: String, kind: String },

    #[error("target '{name}' not found in configuration")]
    #[diagnostic(code(poltergeist::config::target_not_found))]
    TargetNotFound {
        name: String,
        #[help]
        suggestion: Option<String>,
    },
}

/// I/O and persistence errors (spec §7.2).
#[derive(Debug, Error, Diagnostic)]
pub enum StateStoreError {
    #[error("failed to read state file: {}", path.display())]
    #[diagnostic(code(poltergeist::state::read_error))]
    ReadError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file is corrupt: {}", path.display())]
    #[diagnostic(
        code(poltergeist::state::corrupt),
        help("callers may treat this like a missing file")
    )]
    Corrupt {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write state file: {}", path.display())]
    #[diagnostic(code(poltergeist::state::write_error))]
    WriteError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Build Lock errors (spec §7.3 — lock contention is not itself an error
/// at the controller, but acquisition failures from one-shot callers are).
#[derive(Debug, Error, Diagnostic)]
pub enum LockError {
    #[error("build already in progress for target '{target}'")]
    #[diagnostic(
        code(poltergeist::lock::contended),
        help("pass --force to build anyway, or wait for the current build to finish")
    )]
    AlreadyBuilding { target: String },

    #[error("failed to write lock file: {}", path.display())]
    #[diagnostic(code(poltergeist::lock::write_error))]
    WriteError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Build execution errors (spec §7.4-7.6).
#[derive(Debug, Error, Diagnostic)]
pub enum BuilderError {
    #[error("failed to spawn build command for '{target}': {source}")]
    #[diagnostic(code(poltergeist::builder::spawn_failed))]
    SpawnFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open build log: {}", path.display())]
    #[diagnostic(code(poltergeist::builder::log_error))]
    LogError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Watch backend errors (spec §7.7).
#[derive(Debug, Error, Diagnostic)]
pub enum WatchError {
    #[error("failed to connect to file-watch backend: {0}")]
    #[diagnostic(code(poltergeist::watch::connect_failed))]
    ConnectFailed(String),

    #[error("failed to subscribe target '{target}' to watch paths")]
    #[diagnostic(code(poltergeist::watch::subscribe_failed))]
    SubscribeFailed {
        target: String,
        #[source]
        source: notify::Error,
    },
}

/// Daemon lifecycle errors (spec §7.8).
#[derive(Debug, Error, Diagnostic)]
pub enum DaemonError {
    #[error("a daemon is already running for this project (pid {pid})")]
    #[diagnostic(code(poltergeist::daemon::already_running))]
    AlreadyRunning { pid: u32 },

    #[error("daemon did not become ready within {timeout_ms}ms")]
    #[diagnostic(code(poltergeist::daemon::startup_timeout))]
    StartupTimeout { timeout_ms: u64 },

    #[error("no daemon is running for this project")]
    #[diagnostic(code(poltergeist::daemon::not_running))]
    NotRunning,

    #[error("failed to stop daemon (pid {pid}): process did not exit")]
    #[diagnostic(code(poltergeist::daemon::stop_failed))]
    StopFailed { pid: u32 },
}

/// Runner (`polter`) errors.
#[derive(Debug, Error, Diagnostic)]
pub enum PolterError {
    #[error("no poltergeist.config.json found above {}", cwd.display())]
    #[diagnostic(code(poltergeist::polter::no_config))]
    NoConfigFound { cwd: std::path::PathBuf },

    #[error("target '{name}' is not an executable target")]
    #[diagnostic(code(poltergeist::polter::not_executable))]
    NotExecutable { name: String },

    #[error("build is still in progress for '{target}' and --no-wait was given")]
    #[diagnostic(code(poltergeist::polter::no_wait))]
    NoWait { target: String },

    #[error("timed out waiting for build of '{target}' to finish")]
    #[diagnostic(code(poltergeist::polter::wait_timeout))]
    WaitTimeout { target: String },

    #[error("last build of '{target}' failed and --force was not given")]
    #[diagnostic(code(poltergeist::polter::build_failed))]
    BuildFailed { target: String },

    #[error("could not locate an artifact to run for target '{name}'")]
    #[diagnostic(code(poltergeist::polter::artifact_not_found))]
    ArtifactNotFound { name: String },
}

/// Finds the most similar name in `available` to `name`, for "did you
/// mean" suggestions. A small prefix/substring heuristic rather than a
/// fuzzy-matching dependency, since the only call site compares a target
/// name against an already-loaded config's target list.
pub fn find_similar_name<'a>(name: &str, available: impl Iterator<Item = &'a str>) -> Option<String> {
    let name_lower = name.to_lowercase();
    available
        .filter(|candidate| {
            let candidate_lower = candidate.to_lowercase();
            candidate_lower.contains(&name_lower)
                || name_lower.contains(&candidate_lower)
                || levenshtein_le(&name_lower, &candidate_lower, 2)
        })
        .min_by_key(|candidate| candidate.len().abs_diff(name.len()))
        .map(|candidate| format!("did you mean '{candidate}'?"))
}

/// Cheap bounded edit-distance check: true iff the Levenshtein distance
/// between `a` and `b` is at most `max`. Avoids computing the full distance
/// matrix for names outside the bound.
fn levenshtein_le(a: &str, b: &str, max: usize) -> bool {
    if a.len().abs_diff(b.len()) > max {
        return false;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut curr = vec![i];
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr.push((prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost));
        }
        prev = curr;
    }
    prev[b.len()] <= max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_similar_name() {
        let names = ["frontend", "backend", "worker"];
        assert_eq!(
            find_similar_name("frontned", names.iter().copied()),
            Some("did you mean 'frontend'?".to_string())
        );
        assert_eq!(find_similar_name("zzz", names.iter().copied()), None);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::DuplicateTarget {
            name: "app".to_string(),
        };
        assert!(err.to_string().contains("duplicate target name"));
    }
}
