//! Target State Store (spec §4.B): one JSON record per (project, target),
//! written atomically so readers (the CLI, `polter`) never see a torn file.
//!
//! Grounded on the teacher's `state_file.rs` read/write shape, generalized
//! from a single shared TOML file with an embedded daemon map to one JSON
//! file per target, per spec §6 ("one state file per target"). The record
//! shape follows spec §3's `TargetState` field-for-field rather than the
//! teacher's own (much smaller) per-daemon record.

use crate::error::{Error, Result, StateStoreError};
use crate::target::TargetKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: &str = "1.0";
/// Bound on `BuildStats.successfulBuilds` (spec §3: "bounded ring of last
/// ≤ 20").
const MAX_SUCCESSFUL_BUILD_SAMPLES: usize = 20;
/// Bound on `BuildOutcome.errorOutputTail` (spec §3: "last ≤ 32 lines of
/// stderr, each ≤ 1 KiB").
pub const MAX_ERROR_TAIL_LINES: usize = 32;
pub const MAX_ERROR_TAIL_LINE_BYTES: usize = 1024;
/// Bound on `BuildOutcome.errorSummary` (spec §3: "≤ 200 chars").
pub const MAX_ERROR_SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BuildStatus {
    #[default]
    Idle,
    Pending,
    Building,
    Success,
    /// Accepts the legacy spelling "failed" on read (spec §9.OQ3); writers
    /// always emit "failure".
    #[serde(alias = "failed")]
    Failure,
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }
}

/// One daemon process's claim over a target's state, embedded in
/// `TargetState` (spec §3's `daemonProcess`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonProcessInfo {
    pub pid: u32,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub is_active: bool,
}

impl DaemonProcessInfo {
    pub fn current(now: DateTime<Utc>) -> Self {
        Self {
            pid: std::process::id(),
            hostname: crate::env::hostname(),
            started_at: now,
            last_heartbeat_at: now,
            is_active: true,
        }
    }

    /// Invariant 1 (spec §3): a `TargetState` belongs to the running daemon
    /// iff this matches the current process's pid.
    pub fn is_current_daemon(&self) -> bool {
        self.pid == std::process::id()
    }

    /// Heartbeat staleness per spec §9.OQ1's resolution, reused here for
    /// `polter`'s "is the daemon actually alive" check (spec §4.J.3).
    pub fn is_stale(&self, now: DateTime<Utc>, staleness: chrono::Duration) -> bool {
        !self.is_active
            || !crate::procs::PROCS.is_running(self.pid)
            || now.signed_duration_since(self.last_heartbeat_at) > staleness
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub status: BuildStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_output_tail: Option<Vec<String>>,
    pub builder_log_path: PathBuf,
}

impl BuildOutcome {
    /// Clamps `summary` to spec §3's 200-char bound, appending `...` when
    /// truncated.
    pub fn clamp_summary(mut summary: String) -> String {
        if summary.chars().count() > MAX_ERROR_SUMMARY_CHARS {
            summary = summary.chars().take(MAX_ERROR_SUMMARY_CHARS - 3).collect();
            summary.push_str("...");
        }
        summary
    }

    /// Clamps `lines` to spec §3's tail bound: last 32 lines, each
    /// truncated to 1 KiB.
    pub fn clamp_tail(lines: Vec<String>) -> Vec<String> {
        let skip = lines.len().saturating_sub(MAX_ERROR_TAIL_LINES);
        lines
            .into_iter()
            .skip(skip)
            .map(|mut line| {
                if line.len() > MAX_ERROR_TAIL_LINE_BYTES {
                    line.truncate(MAX_ERROR_TAIL_LINE_BYTES);
                }
                line
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessfulBuildSample {
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStats {
    pub successful_builds: VecDeque<SuccessfulBuildSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
}

impl Default for BuildStats {
    fn default() -> Self {
        Self {
            successful_builds: VecDeque::new(),
            avg_duration_ms: None,
            min_duration_ms: None,
            max_duration_ms: None,
        }
    }
}

impl BuildStats {
    /// Appends a successful-build sample and recomputes the derived
    /// avg/min/max fields (spec §3: `BuildStats`' derived stats). Failed and
    /// cancelled builds do not enter the ring.
    fn record(&mut self, outcome: &BuildOutcome) {
        if outcome.status != BuildStatus::Success {
            return;
        }
        self.successful_builds.push_back(SuccessfulBuildSample {
            duration_ms: outcome.duration_ms,
            finished_at: outcome.finished_at,
        });
        while self.successful_builds.len() > MAX_SUCCESSFUL_BUILD_SAMPLES {
            self.successful_builds.pop_front();
        }
        let durations: Vec<u64> = self.successful_builds.iter().map(|s| s.duration_ms).collect();
        self.avg_duration_ms = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<u64>() / durations.len() as u64)
        };
        self.min_duration_ms = durations.iter().min().copied();
        self.max_duration_ms = durations.iter().max().copied();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetState {
    pub schema_version: String,
    pub project_root: PathBuf,
    pub project_name: String,
    pub target: String,
    pub target_kind: TargetKind,
    pub config_path: PathBuf,
    pub daemon_process: DaemonProcessInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_build: Option<BuildOutcome>,
    /// Mirror of `last_build` when its status is `failure`, for structured
    /// inspection without re-checking `last_build.status` (spec §3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_build_error: Option<BuildOutcome>,
    #[serde(default)]
    pub build_stats: BuildStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_info: Option<ArtifactInfo>,
    /// Not part of spec §3's field list, but needed in-process by the
    /// Target Controller's state machine (spec §4.F) to know whether it is
    /// currently Idle/Pending/Building; external readers ignore it in
    /// favor of `lastBuild.status` + Build Lock presence (spec §4.J.3).
    #[serde(default)]
    pub status: BuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_since: Option<DateTime<Utc>>,

    #[serde(skip)]
    path: PathBuf,
}

impl TargetState {
    #[allow(clippy::too_many_arguments)]
    fn new(
        target: &str,
        target_kind: TargetKind,
        project_root: PathBuf,
        project_name: String,
        config_path: PathBuf,
        path: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            project_root,
            project_name,
            target: target.to_string(),
            target_kind,
            config_path,
            daemon_process: DaemonProcessInfo::current(now),
            last_build: None,
            last_build_error: None,
            build_stats: BuildStats::default(),
            artifact_info: None,
            status: BuildStatus::Idle,
            pending_since: None,
            path,
        }
    }

    /// Create-or-load (spec §4.B `initialize`): ensures `daemonProcess`
    /// points at the running daemon while preserving historical
    /// `lastBuild`/`buildStats` from a previous run.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        path: &Path,
        target: &str,
        target_kind: TargetKind,
        project_root: PathBuf,
        project_name: String,
        config_path: PathBuf,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        match Self::read(path, now) {
            Ok(Some(mut existing)) => {
                existing.daemon_process = DaemonProcessInfo::current(now);
                existing.project_root = project_root;
                existing.project_name = project_name;
                existing.config_path = config_path;
                existing.target_kind = target_kind;
                existing.path = path.to_path_buf();
                Ok(existing)
            }
            Ok(None) => Ok(Self::new(
                target,
                target_kind,
                project_root,
                project_name,
                config_path,
                path.to_path_buf(),
                now,
            )),
            Err(e) => {
                log::warn!("state file for '{target}' is corrupt, recreating: {e}");
                Ok(Self::new(
                    target,
                    target_kind,
                    project_root,
                    project_name,
                    config_path,
                    path.to_path_buf(),
                    now,
                ))
            }
        }
    }

    /// Strict read: `Ok(None)` if missing, `Err(Corrupt)` if the file exists
    /// but doesn't parse. Used internally by `initialize`; external readers
    /// (the CLI, `polter`) should prefer [`read_tolerant`] instead.
    pub fn read(path: &Path, now: DateTime<Utc>) -> Result<Option<Self>> {
        let _ = now;
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path).map_err(|source| {
            Error::StateStore(StateStoreError::ReadError {
                path: path.to_path_buf(),
                source,
            })
        })?;
        let mut state: TargetState = serde_json::from_str(&raw).map_err(|source| {
            Error::StateStore(StateStoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
        })?;
        state.path = path.to_path_buf();
        Ok(Some(state))
    }

    /// Readers outside the daemon perform a strict read and treat a parse
    /// failure or a vanished file as "unknown" rather than erroring (spec
    /// §4.B, §9 "Corrupt file policy for readers").
    pub fn read_tolerant(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        let mut state: TargetState = serde_json::from_str(&raw).ok()?;
        state.path = path.to_path_buf();
        Some(state)
    }

    /// Writes the record via write-to-temp-then-rename in the same
    /// directory, so a crash mid-write never leaves a half-written file in
    /// `path`'s place (spec §4.B's atomicity requirement; same pattern the
    /// Build Lock and Daemon Info records use).
    pub fn write(&self) -> Result<()> {
        write_atomic(&self.path, self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mark_pending(&mut self, now: DateTime<Utc>) {
        self.status = BuildStatus::Pending;
        self.pending_since = Some(now);
    }

    pub fn mark_building(&mut self) {
        self.status = BuildStatus::Building;
        self.pending_since = None;
    }

    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        self.daemon_process.last_heartbeat_at = now;
    }

    pub fn mark_inactive(&mut self) {
        self.daemon_process.is_active = false;
    }

    /// Records a completed build attempt (spec §4.B `recordBuildOutcome`):
    /// updates `lastBuild`, appends to the successful-build ring iff
    /// `status == success`, and mirrors failures into `lastBuildError`.
    pub fn record_outcome(&mut self, outcome: BuildOutcome) {
        self.build_stats.record(&outcome);
        self.status = outcome.status;
        self.pending_since = None;
        if outcome.status == BuildStatus::Failure {
            self.last_build_error = Some(outcome.clone());
        }
        self.last_build = Some(outcome);
    }

    pub fn set_artifact_info(&mut self, info: ArtifactInfo) {
        self.artifact_info = Some(info);
    }
}

pub(crate) fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value).map_err(|source| {
        Error::StateStore(StateStoreError::WriteError {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, source),
        })
    })?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|source| {
        Error::StateStore(StateStoreError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    })?;
    let tmp_path = dir.join(format!(
        ".{}.tmp.{}.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state"),
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::write(&tmp_path, raw).map_err(|source| {
        Error::StateStore(StateStoreError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    })?;
    if let Ok(file) = std::fs::File::open(&tmp_path) {
        let _ = file.sync_all();
    }
    std::fs::rename(&tmp_path, path).map_err(|source| {
        Error::StateStore(StateStoreError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    })?;
    Ok(())
}

/// Enumerates every `*.state` file under `state_dir`, for `poltergeist list`
/// and `poltergeist clean` (spec §4.B `enumerate`, across all projects).
pub fn enumerate(state_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !state_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in std::fs::read_dir(state_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("state") {
            found.push(path);
        }
    }
    Ok(found)
}

pub fn remove(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(dir: &Path, now: DateTime<Utc>) -> TargetState {
        TargetState::initialize(
            &dir.join("app.state"),
            "app",
            TargetKind::Executable,
            dir.to_path_buf(),
            "myproj".to_string(),
            dir.join("poltergeist.config.json"),
            now,
        )
        .unwrap()
    }

    fn outcome(status: BuildStatus, now: DateTime<Utc>, duration_ms: u64) -> BuildOutcome {
        BuildOutcome {
            status,
            started_at: now,
            finished_at: now,
            duration_ms,
            exit_code: Some(if status == BuildStatus::Success { 0 } else { 1 }),
            git_hash: None,
            error_summary: None,
            error_output_tail: None,
            builder_log_path: PathBuf::from("/tmp/app.log"),
        }
    }

    #[test]
    fn test_initialize_missing_file_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let state = fresh(dir.path(), Utc::now());
        assert_eq!(state.status, BuildStatus::Idle);
        assert!(state.last_build.is_none());
        assert_eq!(state.daemon_process.pid, std::process::id());
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let mut state = fresh(dir.path(), now);
        state.record_outcome(outcome(BuildStatus::Success, now, 1200));
        state.write().unwrap();

        let reread = TargetState::read(&dir.path().join("app.state"), now).unwrap().unwrap();
        assert_eq!(reread.status, BuildStatus::Success);
        assert_eq!(reread.build_stats.successful_builds.len(), 1);
        assert_eq!(reread.build_stats.avg_duration_ms, Some(1200));
    }

    #[test]
    fn test_initialize_preserves_history_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let mut state = fresh(dir.path(), now);
        state.record_outcome(outcome(BuildStatus::Success, now, 500));
        state.write().unwrap();

        let restarted = fresh(dir.path(), now + chrono::Duration::seconds(5));
        assert_eq!(restarted.build_stats.successful_builds.len(), 1);
        assert!(restarted.last_build.is_some());
    }

    #[test]
    fn test_successful_builds_ring_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let mut state = fresh(dir.path(), now);
        for i in 0..25u64 {
            state.record_outcome(outcome(BuildStatus::Success, now, i));
        }
        assert_eq!(state.build_stats.successful_builds.len(), MAX_SUCCESSFUL_BUILD_SAMPLES);
        assert_eq!(state.build_stats.max_duration_ms, Some(24));
    }

    #[test]
    fn test_failure_populates_last_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let mut state = fresh(dir.path(), now);
        state.record_outcome(outcome(BuildStatus::Failure, now, 10));
        assert!(state.last_build_error.is_some());
        assert_eq!(state.last_build.unwrap().status, BuildStatus::Failure);
    }

    #[test]
    fn test_failed_synonym_accepted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.state");
        let now = Utc::now();
        let mut state = fresh(dir.path(), now);
        state.record_outcome(outcome(BuildStatus::Failure, now, 10));
        state.write().unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let patched = raw.replace("\"failure\"", "\"failed\"");
        std::fs::write(&path, patched).unwrap();
        let reread = TargetState::read(&path, now).unwrap().unwrap();
        assert_eq!(reread.status, BuildStatus::Failure);
    }

    #[test]
    fn test_write_always_emits_failure_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let mut state = fresh(dir.path(), now);
        state.record_outcome(outcome(BuildStatus::Failure, now, 10));
        state.write().unwrap();
        let raw = std::fs::read_to_string(dir.path().join("app.state")).unwrap();
        assert!(raw.contains("\"failure\""));
        assert!(!raw.contains("\"failed\""));
    }

    #[test]
    fn test_corrupt_file_is_an_error_on_strict_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.state");
        std::fs::write(&path, "not json").unwrap();
        let err = TargetState::read(&path, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::StateStore(StateStoreError::Corrupt { .. })));
    }

    #[test]
    fn test_corrupt_file_is_none_on_tolerant_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.state");
        std::fs::write(&path, "not json").unwrap();
        assert!(TargetState::read_tolerant(&path).is_none());
    }

    #[test]
    fn test_clamp_summary_truncates() {
        let long = "e".repeat(300);
        let clamped = BuildOutcome::clamp_summary(long);
        assert_eq!(clamped.chars().count(), MAX_ERROR_SUMMARY_CHARS);
        assert!(clamped.ends_with("..."));
    }

    #[test]
    fn test_clamp_tail_keeps_last_lines_only() {
        let lines: Vec<String> = (0..50).map(|i| format!("line {i}")).collect();
        let clamped = BuildOutcome::clamp_tail(lines);
        assert_eq!(clamped.len(), MAX_ERROR_TAIL_LINES);
        assert_eq!(clamped[0], "line 18");
    }

    #[test]
    fn test_enumerate_lists_state_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.state"), "{}").unwrap();
        std::fs::write(dir.path().join("a.lock"), "{}").unwrap();
        let found = enumerate(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
    }
}
