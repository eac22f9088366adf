//! Runner (`polter`, spec §4.J): the freshness-aware execution wrapper.
//! Unlike every other component, this is a short-lived tool with no
//! daemon-process dependency — it only reads `TargetState`/`BuildLock` and,
//! on a recent failure, calls the [`crate::builder`] in-process once.
//!
//! Grounded on `pitchfork_toml.rs`'s `find_up`-based config discovery and
//! `cli/run.rs`'s wait-then-exec shape, adapted to spec §4.J's exact step
//! sequence. The final exec is `std::os::unix::process::CommandExt::exec`
//! rather than the teacher's `exec` crate dependency, since this is the
//! only call site that needs process-replace semantics.

use crate::build_lock::{self, AcquireOutcome};
use crate::builder;
use crate::config::Config;
use crate::error::{Error, PolterError, Result};
use crate::paths::ProjectIdentity;
use crate::state_store::{BuildOutcome, BuildStatus, TargetState};
use crate::target::Target;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const AUTO_REBUILD_WINDOW: chrono::Duration = chrono::Duration::minutes(5);
const ARTIFACT_SEARCH_DIRS: [&str; 2] = ["build", "dist"];
const ARTIFACT_EXTENSIONS: [&str; 5] = ["", ".js", ".mjs", ".py", ".sh"];

pub struct PolterOptions {
    pub force: bool,
    pub no_wait: bool,
    pub timeout: Duration,
    pub verbose: bool,
}

impl Default for PolterOptions {
    fn default() -> Self {
        Self {
            force: false,
            no_wait: false,
            timeout: Duration::from_secs(30),
            verbose: false,
        }
    }
}

/// Runs `<target> [args...]`, blocking (per spec §4.J) until it is safe to
/// do so, then replaces this process with the target's artifact. Only
/// returns on failure — success execs and never comes back.
pub async fn run(target_name: &str, args: &[String], config_path: Option<&Path>, opts: PolterOptions) -> Result<()> {
    if opts.verbose {
        log::set_max_level(log::LevelFilter::Debug);
    }
    let cwd = crate::env::CWD.clone();

    let config = match config_path {
        Some(path) => Config::load(path)?,
        None => match Config::find_up(&cwd) {
            Some(path) => Config::load(&path)?,
            None => return Err(stale_execution(target_name, args, &cwd)),
        },
    };

    let target = config.find_target(target_name)?;
    if target.kind != crate::target::TargetKind::Executable {
        return Err(Error::Polter(PolterError::NotExecutable { name: target.name.clone() }));
    }

    let project_root = config
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.clone());
    let identity = ProjectIdentity::new(&project_root)?;
    let state_dir = crate::env::state_dir();
    let state_path = identity.state_file_path(&state_dir, &target.name);
    let lock_path = identity.lock_file_path(&state_dir, &target.name);

    let Some(mut state) = TargetState::read_tolerant(&state_path) else {
        log::warn!("no state recorded for '{}', running without a freshness check", target.name);
        let artifact = resolve_artifact(None, target, &project_root)?;
        return Err(launch(&artifact, args, &project_root));
    };

    let now = Utc::now();
    if state
        .daemon_process
        .is_stale(now, chrono::Duration::seconds(crate::build_lock::STALE_HEARTBEAT_SECS))
    {
        log::warn!("poltergeist is not running for this project");
        let artifact = resolve_artifact(Some(&state), target, &project_root)?;
        if !is_artifact_fresh(&artifact, target, &project_root) {
            log::warn!("'{}' may be stale: source files changed since it was last built", target.name);
        }
        return Err(launch(&artifact, args, &project_root));
    }

    if state.status == BuildStatus::Building {
        state = wait_for_build(&state_path, &target.name, opts.no_wait, opts.timeout).await?;
    }

    if state.status == BuildStatus::Failure {
        state = handle_failure(&config, &identity, &state_dir, &state_path, &lock_path, target, state, opts.force, opts.timeout).await?;
    }

    let artifact = resolve_artifact(Some(&state), target, &project_root)?;
    Err(launch(&artifact, args, &project_root))
}

/// No config was found anywhere above `cwd` (spec §4.J.1): falls back to
/// resolving the conventional output path for `target_name` directly,
/// warning that this is a best-effort "stale execution" rather than a
/// freshness-checked one.
fn stale_execution(target_name: &str, args: &[String], cwd: &Path) -> Error {
    log::warn!("no poltergeist.config.json found above {}; attempting stale execution", cwd.display());
    match find_artifact(cwd, target_name) {
        Some(artifact) => launch(&artifact, args, cwd),
        None => Error::Polter(PolterError::NoConfigFound { cwd: cwd.to_path_buf() }),
    }
}

/// Polls `state_path` every 250ms until the build's status leaves
/// `Building` or `timeout` elapses (spec §4.J.4).
async fn wait_for_build(state_path: &Path, target_name: &str, no_wait: bool, timeout: Duration) -> Result<TargetState> {
    if no_wait {
        return Err(Error::Polter(PolterError::NoWait { target: target_name.to_string() }));
    }
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Polter(PolterError::WaitTimeout { target: target_name.to_string() }));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
        let Some(state) = TargetState::read_tolerant(state_path) else {
            continue;
        };
        if state.status != BuildStatus::Building {
            return Ok(state);
        }
    }
}

/// Handles a `lastBuild.status == failure` observation (spec §4.J.5):
/// `--force` overrides it outright; otherwise a recent failure triggers one
/// automatic in-process rebuild unless `POLTERGEIST_NO_AUTO_REBUILD` is set.
#[allow(clippy::too_many_arguments)]
async fn handle_failure(
    config: &Config,
    identity: &ProjectIdentity,
    state_dir: &Path,
    state_path: &Path,
    lock_path: &Path,
    target: &Target,
    state: TargetState,
    force: bool,
    timeout: Duration,
) -> Result<TargetState> {
    if force {
        log::warn!("last build of '{}' failed; running anyway because --force was given", target.name);
        return Ok(state);
    }

    if let Some(hint) = state.last_build.as_ref().and_then(stuck_build_hint) {
        log::warn!("'{}': {hint}", target.name);
    }

    let recent = state
        .last_build
        .as_ref()
        .is_some_and(|b| Utc::now().signed_duration_since(b.finished_at) <= AUTO_REBUILD_WINDOW);
    if !recent || crate::env::no_auto_rebuild() {
        return Err(Error::Polter(PolterError::BuildFailed { target: target.name.clone() }));
    }

    log::info!("'{}' failed recently, attempting one automatic rebuild", target.name);
    let now = Utc::now();
    match build_lock::BuildLock::try_acquire(lock_path, &target.name, &target.build_command, now)? {
        AcquireOutcome::Held(_) => {
            wait_for_lock_release(lock_path, &target.name, timeout).await?;
            TargetState::read_tolerant(state_path)
                .filter(|s| s.status == BuildStatus::Success)
                .ok_or_else(|| Error::Polter(PolterError::BuildFailed { target: target.name.clone() }))
        }
        AcquireOutcome::Acquired(lock) => {
            let environment: Vec<(String, String)> =
                target.environment.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let log_path = state_dir.join(format!("{}.log", target.name));
            let output = builder::run_build(
                &target.name,
                &target.build_command,
                &identity.canonical_root,
                &environment,
                &log_path,
                target.timeout_ms.map(Duration::from_millis),
                &[],
            )
            .await;
            let _ = lock.release();

            let outcome = match &output {
                Ok(result) => BuildOutcome {
                    status: if result.success { BuildStatus::Success } else { BuildStatus::Failure },
                    started_at: now,
                    finished_at: Utc::now(),
                    duration_ms: result.duration.as_millis() as u64,
                    exit_code: result.exit_code,
                    git_hash: None,
                    error_summary: result.error_summary.clone(),
                    error_output_tail: (!result.error_output_tail.is_empty()).then(|| result.error_output_tail.clone()),
                    builder_log_path: log_path.clone(),
                },
                Err(e) => BuildOutcome {
                    status: BuildStatus::Failure,
                    started_at: now,
                    finished_at: Utc::now(),
                    duration_ms: 0,
                    exit_code: None,
                    git_hash: None,
                    error_summary: Some(BuildOutcome::clamp_summary(e.to_string())),
                    error_output_tail: None,
                    builder_log_path: log_path.clone(),
                },
            };

            let success = outcome.status == BuildStatus::Success;
            if let Ok(mut updated) = TargetState::initialize(
                state_path,
                &target.name,
                target.kind,
                identity.canonical_root.clone(),
                identity.project_name.clone(),
                config.path.clone(),
                Utc::now(),
            ) {
                updated.record_outcome(outcome);
                let _ = updated.write();
            }

            if success {
                TargetState::read_tolerant(state_path).ok_or_else(|| Error::Polter(PolterError::BuildFailed { target: target.name.clone() }))
            } else {
                Err(Error::Polter(PolterError::BuildFailed { target: target.name.clone() }))
            }
        }
    }
}

async fn wait_for_lock_release(lock_path: &Path, target_name: &str, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !build_lock::is_held(lock_path, Utc::now()) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Polter(PolterError::WaitTimeout { target: target_name.to_string() }));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Recognizes the "stuck build" sentinels named in spec §4.J.5, so a
/// failure caused by lock contention gets a more useful message than a
/// bare "build failed" even though `--force` is still required either way.
fn stuck_build_hint(outcome: &BuildOutcome) -> Option<&'static str> {
    const SENTINELS: &[(&str, &str)] = &[
        ("another process is already running", "a previous build may still be stuck; `poltergeist stop` then retry, or pass --force"),
        ("resource temporarily unavailable", "the build lock could not be acquired; pass --force to bypass"),
        ("cannot obtain lock", "the build lock could not be acquired; pass --force to bypass"),
        ("file is locked", "the build lock could not be acquired; pass --force to bypass"),
    ];
    let mut haystack = outcome.error_summary.clone().unwrap_or_default();
    if let Some(tail) = &outcome.error_output_tail {
        haystack.push('\n');
        haystack.push_str(&tail.join("\n"));
    }
    let haystack = haystack.to_lowercase();
    SENTINELS.iter().find(|(needle, _)| haystack.contains(needle)).map(|(_, hint)| *hint)
}

/// Resolves the artifact path (spec §4.J.6): a persisted `artifactInfo`
/// first, then the target's own `outputPath`, then a deterministic search.
fn resolve_artifact(state: Option<&TargetState>, target: &Target, project_root: &Path) -> Result<PathBuf> {
    if let Some(path) = state
        .and_then(|s| s.artifact_info.as_ref())
        .and_then(|info| info.output_path.as_ref())
        .filter(|p| p.is_file())
    {
        return Ok(path.clone());
    }
    if let Some(output_path) = &target.output_path {
        let resolved = if output_path.is_absolute() { output_path.clone() } else { project_root.join(output_path) };
        if resolved.is_file() {
            return Ok(resolved);
        }
    }
    find_artifact(project_root, &target.name)
        .ok_or_else(|| Error::Polter(PolterError::ArtifactNotFound { name: target.name.clone() }))
}

/// Deterministic search order from spec §4.J.6: project root, `./build/`,
/// `./dist/`; trying no extension then `.js`, `.mjs`, `.py`, `.sh`.
fn find_artifact(project_root: &Path, name: &str) -> Option<PathBuf> {
    let mut dirs = vec![project_root.to_path_buf()];
    dirs.extend(ARTIFACT_SEARCH_DIRS.iter().map(|d| project_root.join(d)));
    for dir in &dirs {
        for ext in ARTIFACT_EXTENSIONS {
            let candidate = dir.join(format!("{name}{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Best-effort freshness check (spec §4.J.3, property P6): the artifact's
/// mtime should be no older than every file matched by the target's
/// `watchPaths`. Conservatively returns `true` (assume fresh) if mtimes
/// can't be read at all.
fn is_artifact_fresh(artifact: &Path, target: &Target, project_root: &Path) -> bool {
    let Ok(artifact_mtime) = std::fs::metadata(artifact).and_then(|m| m.modified()) else {
        return true;
    };
    for pattern in &target.watch_paths {
        let full_pattern = project_root.join(pattern);
        let Ok(paths) = glob::glob(&full_pattern.to_string_lossy()) else {
            continue;
        };
        for entry in paths.flatten() {
            if let Ok(mtime) = std::fs::metadata(&entry).and_then(|m| m.modified()) {
                if mtime > artifact_mtime {
                    return false;
                }
            }
        }
    }
    true
}

/// Selects a launcher by artifact suffix (spec §4.J.7) and execs in place
/// (spec §4.J.8): stdio is inherited automatically since `exec` replaces
/// this process's image rather than spawning a child.
#[cfg(unix)]
fn launch(artifact: &Path, args: &[String], project_root: &Path) -> Error {
    use std::os::unix::process::CommandExt;
    let mut cmd = match launcher_for(artifact) {
        Some(launcher) => {
            let mut cmd = std::process::Command::new(launcher);
            cmd.arg(artifact);
            cmd
        }
        None => std::process::Command::new(artifact),
    };
    cmd.args(args).current_dir(project_root);
    Error::Io(cmd.exec())
}

#[cfg(not(unix))]
fn launch(artifact: &Path, args: &[String], project_root: &Path) -> Error {
    let mut cmd = match launcher_for(artifact) {
        Some(launcher) => {
            let mut cmd = std::process::Command::new(launcher);
            cmd.arg(artifact);
            cmd
        }
        None => std::process::Command::new(artifact),
    };
    cmd.args(args).current_dir(project_root);
    match cmd.status() {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(e) => Error::Io(e),
    }
}

fn launcher_for(artifact: &Path) -> Option<&'static str> {
    match artifact.extension().and_then(|e| e.to_str()) {
        Some("js") | Some("mjs") => Some("node"),
        Some("py") => Some("python"),
        Some("sh") => Some("sh"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::ArtifactInfo;
    use indexmap::IndexMap;

    fn target() -> Target {
        Target {
            name: "app".to_string(),
            kind: crate::target::TargetKind::Executable,
            enabled: true,
            build_command: "true".to_string(),
            output_path: None,
            watch_paths: vec![],
            exclude_paths: vec![],
            settling_delay_ms: 500,
            max_retries: 0,
            environment: IndexMap::new(),
            bundle_id: None,
            timeout_ms: None,
        }
    }

    #[test]
    fn test_launcher_selection() {
        assert_eq!(launcher_for(Path::new("app.js")), Some("node"));
        assert_eq!(launcher_for(Path::new("app.mjs")), Some("node"));
        assert_eq!(launcher_for(Path::new("app.py")), Some("python"));
        assert_eq!(launcher_for(Path::new("app.sh")), Some("sh"));
        assert_eq!(launcher_for(Path::new("app")), None);
    }

    #[test]
    fn test_find_artifact_searches_build_and_dist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist").join("app"), "").unwrap();
        let found = find_artifact(dir.path(), "app").unwrap();
        assert_eq!(found, dir.path().join("dist").join("app"));
    }

    #[test]
    fn test_find_artifact_tries_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "").unwrap();
        let found = find_artifact(dir.path(), "app").unwrap();
        assert_eq!(found, dir.path().join("app.py"));
    }

    #[test]
    fn test_stuck_build_hint_matches_sentinel() {
        let outcome = BuildOutcome {
            status: BuildStatus::Failure,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 0,
            exit_code: Some(1),
            git_hash: None,
            error_summary: Some("Resource temporarily unavailable".to_string()),
            error_output_tail: None,
            builder_log_path: PathBuf::from("/tmp/app.log"),
        };
        assert!(stuck_build_hint(&outcome).is_some());
    }

    #[test]
    fn test_stuck_build_hint_none_for_ordinary_failure() {
        let outcome = BuildOutcome {
            status: BuildStatus::Failure,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 0,
            exit_code: Some(1),
            git_hash: None,
            error_summary: Some("error: mismatched types".to_string()),
            error_output_tail: None,
            builder_log_path: PathBuf::from("/tmp/app.log"),
        };
        assert!(stuck_build_hint(&outcome).is_none());
    }

    #[test]
    fn test_resolve_artifact_prefers_artifact_info() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_path = dir.path().join("built-app");
        std::fs::write(&artifact_path, "").unwrap();

        let mut state = TargetState::initialize(
            &dir.path().join("app.state"),
            "app",
            crate::target::TargetKind::Executable,
            dir.path().to_path_buf(),
            "proj".to_string(),
            dir.path().join("poltergeist.config.json"),
            Utc::now(),
        )
        .unwrap();
        state.set_artifact_info(ArtifactInfo {
            output_path: Some(artifact_path.clone()),
            bundle_id: None,
        });

        let resolved = resolve_artifact(Some(&state), &target(), dir.path()).unwrap();
        assert_eq!(resolved, artifact_path);
    }

    #[test]
    fn test_is_artifact_fresh_detects_newer_source() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("app");
        std::fs::write(&artifact, "").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(dir.path().join("main.rs"), "changed").unwrap();

        let mut t = target();
        t.watch_paths = vec!["*.rs".to_string()];
        assert!(!is_artifact_fresh(&artifact, &t, dir.path()));
    }
}
