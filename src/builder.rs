//! Builder (spec §4.E): runs a target's `buildCommand` under `sh -c`,
//! capturing combined stdout/stderr to the target's build log and
//! extracting a short error summary on failure.
//!
//! Spawning is grounded on the teacher's `cmd!(...).start()` pattern from
//! `supervisor/mod.rs`; log-tail reading on `rev_lines` usage in
//! `cli/logs.rs`, trimmed from a multi-daemon merged pager down to "read
//! the last few lines of one file".

use crate::error::{BuilderError, Error, Result};
use crate::procs::PROCS;
use chrono::Utc;
use regex::Regex;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const ERROR_SUMMARY_TAIL_LINES: usize = 50;

pub struct BuildOutput {
    pub success: bool,
    pub duration: Duration,
    pub exit_code: Option<i32>,
    pub error_summary: Option<String>,
    pub error_output_tail: Vec<String>,
}

/// Runs `command` via `sh -c`, appending combined output to `log_path`, and
/// enforces `timeout` by killing the whole process group if exceeded.
/// `timeout = None` means no timeout (spec §4.E default: none — a build
/// runs to completion however long it takes). `changed_paths` is logged
/// only, never passed to the command (spec §4.E's builder contract).
pub async fn run_build(
    target_name: &str,
    command: &str,
    working_dir: &Path,
    environment: &[(String, String)],
    log_path: &Path,
    timeout: Option<Duration>,
    changed_paths: &[PathBuf],
) -> Result<BuildOutput> {
    let started_at = Instant::now();

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|source| Error::Builder(BuilderError::LogError { path: log_path.to_path_buf(), source }))?;

    writeln!(log_file, "--- build started at {} ---", Utc::now().to_rfc3339()).ok();
    if !changed_paths.is_empty() {
        let list = changed_paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ");
        writeln!(log_file, "changed: {list}").ok();
    }
    writeln!(log_file, "$ {command}").ok();
    log_file.sync_all().ok();

    let mut expr = duct::cmd!("sh", "-c", command)
        .dir(working_dir)
        .stderr_to_stdout()
        .stdout_file(log_file.try_clone().map_err(|source| {
            Error::Builder(BuilderError::LogError { path: log_path.to_path_buf(), source })
        })?)
        .unchecked();
    for (key, value) in environment {
        expr = expr.env(key, value);
    }

    let handle = std::sync::Arc::new(expr.start().map_err(|source| {
        Error::Builder(BuilderError::SpawnFailed { target: target_name.to_string(), source })
    })?);

    let wait_handle = handle.clone();
    let output = tokio::task::spawn_blocking(move || wait_handle.wait().map(|o| o.status));

    let mut timed_out = false;
    let status = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, output).await {
            Ok(joined) => joined.ok().and_then(|r| r.ok()),
            Err(_) => {
                timed_out = true;
                log::warn!("build for '{target_name}' exceeded {timeout:?}, killing process group");
                if let Some(pid) = handle.pids().first().copied() {
                    PROCS.kill_process_group_async(pid).await;
                }
                None
            }
        },
        None => output.await.ok().and_then(|r| r.ok()),
    };

    let duration = started_at.elapsed();
    let success = !timed_out && status.map(|s| s.success()).unwrap_or(false);
    let exit_code = status.and_then(|s| s.code());

    writeln!(log_file, "--- build {} after {:?} ---", if success { "succeeded" } else { "failed" }, duration).ok();

    let (error_summary, error_output_tail) = if success {
        (None, Vec::new())
    } else if timed_out {
        let tail = read_log_tail(log_path);
        (
            Some(format!("build timeout after {}ms", duration.as_millis())),
            crate::state_store::BuildOutcome::clamp_tail(tail),
        )
    } else {
        let tail = read_log_tail(log_path);
        (extract_error_summary(&tail), crate::state_store::BuildOutcome::clamp_tail(tail))
    };

    Ok(BuildOutput { success, duration, exit_code, error_summary, error_output_tail })
}

/// Reads the last `ERROR_SUMMARY_TAIL_LINES` lines of the build log, oldest
/// first.
fn read_log_tail(log_path: &Path) -> Vec<String> {
    let Some(file) = std::fs::File::open(log_path).ok() else {
        return Vec::new();
    };
    let rev = rev_lines::RevLines::new(file);
    let mut tail: Vec<String> = rev.filter_map(Result::ok).take(ERROR_SUMMARY_TAIL_LINES).collect();
    tail.reverse();
    tail
}

/// Pulls out lines that look like compiler/linker error output from `tail`,
/// joined and clamped to the state store's summary bound.
fn extract_error_summary(tail: &[String]) -> Option<String> {
    let error_re = error_pattern();
    let matched: Vec<&str> = tail.iter().filter(|l| error_re.is_match(l)).map(|l| l.as_str()).collect();
    let chosen: Vec<&str> = if matched.is_empty() {
        tail.iter().rev().take(5).map(|l| l.as_str()).collect()
    } else {
        matched
    };

    let summary = chosen.join("\n");
    if summary.is_empty() {
        None
    } else {
        Some(crate::state_store::BuildOutcome::clamp_summary(summary))
    }
}

fn error_pattern() -> &'static Regex {
    static ERROR_RE: OnceLock<Regex> = OnceLock::new();
    ERROR_RE.get_or_init(|| {
        Regex::new(r"(?i)\berror(\[[^\]]*\])?\s*:|\bfatal error\b|undefined reference|cannot find|failed to compile")
            .expect("static regex is valid")
    })
}
