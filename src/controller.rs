//! Target Controller (spec §4.F): owns one target's build state machine —
//! Idle → Pending → Building → (Success | Failure) → Idle — debouncing
//! rapid-fire change events into a single rebuild and carrying over a
//! change that arrives mid-build into the next one.
//!
//! Modeled as an actor with a mailbox, the same shape the teacher uses for
//! its supervisor's signal/watch loops (`supervisor/mod.rs`), generalized
//! from "one loop per daemon" to "one task per target".

use crate::build_lock::{AcquireOutcome, BuildLock};
use crate::builder;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::state_store::{BuildOutcome, BuildStatus, TargetState};
use crate::target::{Target, TargetKind};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub enum ControllerMessage {
    /// A file-change event matched this target's watch patterns. Carries
    /// the matched paths (relative to the project root), threaded through
    /// to the build log for spec §4.E's "changed paths, for logging only".
    FileChanged(Vec<PathBuf>),
    /// Force a rebuild now, bypassing the debounce timer (CLI `build --force`).
    ForceBuild { reply: tokio::sync::oneshot::Sender<Result<BuildOutcome>> },
    /// Periodic tick from the Orchestrator's heartbeat task (spec §4.B
    /// `startHeartbeat`): refreshes `daemonProcess.lastHeartbeatAt`.
    Heartbeat,
    Shutdown,
}

pub struct ControllerHandle {
    pub target_name: String,
    sender: mpsc::UnboundedSender<ControllerMessage>,
    task: tokio::task::JoinHandle<()>,
}

impl ControllerHandle {
    pub fn send(&self, message: ControllerMessage) {
        let _ = self.sender.send(message);
    }

    pub async fn shutdown(self) {
        let _ = self.sender.send(ControllerMessage::Shutdown);
        let _ = self.task.await;
    }
}

struct ControllerState {
    target: Target,
    project_root: PathBuf,
    project_name: String,
    config_path: PathBuf,
    state_path: PathBuf,
    lock_path: PathBuf,
    log_path: PathBuf,
    pending_again: bool,
    /// Union of changed paths buffered since the last build started (spec
    /// §4.F: coalesced across batches arriving during Pending/Building).
    pending_paths: Vec<PathBuf>,
}

/// Spawns the actor task for `target` and returns a handle to send it
/// events. `scheduler` bounds cross-target build concurrency (spec §4.F's
/// "parallelization" setting).
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    target: Target,
    project_root: PathBuf,
    project_name: String,
    config_path: PathBuf,
    state_path: PathBuf,
    lock_path: PathBuf,
    log_path: PathBuf,
    scheduler: Arc<Scheduler>,
    run_initial_build: bool,
) -> ControllerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let target_name = target.name.clone();
    let state = ControllerState {
        target,
        project_root,
        project_name,
        config_path,
        state_path,
        lock_path,
        log_path,
        pending_again: false,
        pending_paths: Vec::new(),
    };

    let task = tokio::spawn(run(state, rx, scheduler, run_initial_build));

    ControllerHandle { target_name, sender: tx, task }
}

async fn run(
    mut state: ControllerState,
    mut rx: mpsc::UnboundedReceiver<ControllerMessage>,
    scheduler: Arc<Scheduler>,
    run_initial_build: bool,
) {
    if run_initial_build {
        build_once(&mut state, &scheduler).await;
    }

    loop {
        let debounce = Duration::from_millis(state.target.settling_delay_ms);
        let message = if state.pending_again {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(m)) => m,
                Ok(None) => break,
                Err(_) => {
                    state.pending_again = false;
                    build_once(&mut state, &scheduler).await;
                    continue;
                }
            }
        } else {
            match rx.recv().await {
                Some(m) => m,
                None => break,
            }
        };

        match message {
            ControllerMessage::FileChanged(paths) => {
                state.pending_again = true;
                for path in paths {
                    if !state.pending_paths.contains(&path) {
                        state.pending_paths.push(path);
                    }
                }
                mark_pending(&state);
                scheduler.record_focus(&state.target.name, Utc::now());
            }
            ControllerMessage::ForceBuild { reply } => {
                let outcome = build_once(&mut state, &scheduler).await;
                let _ = reply.send(outcome);
            }
            ControllerMessage::Heartbeat => {
                let now = Utc::now();
                if let Ok(mut target_state) = load_state(&state, now) {
                    target_state.heartbeat(now);
                    let _ = target_state.write();
                }
            }
            ControllerMessage::Shutdown => break,
        }
    }
}

fn load_state(state: &ControllerState, now: chrono::DateTime<Utc>) -> Result<TargetState> {
    TargetState::initialize(
        &state.state_path,
        &state.target.name,
        state.target.kind,
        state.project_root.clone(),
        state.project_name.clone(),
        state.config_path.clone(),
        now,
    )
}

fn mark_pending(state: &ControllerState) {
    let now = Utc::now();
    if let Ok(mut target_state) = load_state(state, now) {
        target_state.mark_pending(now);
        let _ = target_state.write();
    }
}

/// Runs exactly one build cycle: acquire the lock, run the build command,
/// record the outcome, release the lock. Concurrency across targets is
/// bounded by `scheduler` (spec §4.F/§4.G); within a target, the actor loop
/// itself guarantees no overlap since it processes one message at a time.
async fn build_once(state: &mut ControllerState, scheduler: &Arc<Scheduler>) -> Result<BuildOutcome> {
    let _permit = scheduler.semaphore().acquire_owned().await;

    let changed_paths = std::mem::take(&mut state.pending_paths);
    let now = Utc::now();
    let mut target_state = load_state(state, now)?;
    target_state.mark_building();
    target_state.write()?;

    let mut lock = match BuildLock::try_acquire(&state.lock_path, &state.target.name, &state.target.build_command, now)? {
        AcquireOutcome::Acquired(lock) => lock,
        AcquireOutcome::Held(_) => {
            return Ok(BuildOutcome {
                status: target_state.status,
                started_at: now,
                finished_at: now,
                duration_ms: 0,
                exit_code: None,
                git_hash: None,
                error_summary: Some("skipped: build already in progress".to_string()),
                error_output_tail: None,
                builder_log_path: state.log_path.clone(),
            });
        }
    };

    let environment: Vec<(String, String)> = state
        .target
        .environment
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let timeout = state
        .target
        .timeout_ms
        .map(Duration::from_millis)
        .map(|base| scheduler.effective_timeout(&state.target.name, base, now));

    let build_future = builder::run_build(
        &state.target.name,
        &state.target.build_command,
        &state.project_root,
        &environment,
        &state.log_path,
        timeout,
        &changed_paths,
    );
    tokio::pin!(build_future);

    // Refreshes the lock's heartbeat every ~5s while the build runs (spec
    // §4.C `heartbeat`), so a long build is never mistaken for a crashed one.
    let mut heartbeat = tokio::time::interval(Duration::from_secs(5));
    heartbeat.tick().await;
    let result = loop {
        tokio::select! {
            result = &mut build_future => break result,
            _ = heartbeat.tick() => {
                let _ = lock.heartbeat(Utc::now());
            }
        }
    };

    let _ = lock.release();

    let finished_at = Utc::now();
    let outcome = match result {
        Ok(output) => BuildOutcome {
            status: if output.success { BuildStatus::Success } else { BuildStatus::Failure },
            started_at: now,
            finished_at,
            duration_ms: output.duration.as_millis() as u64,
            exit_code: output.exit_code,
            git_hash: git_hash(&state.project_root).await,
            error_summary: output.error_summary,
            error_output_tail: (!output.error_output_tail.is_empty()).then_some(output.error_output_tail),
            builder_log_path: state.log_path.clone(),
        },
        Err(e) => BuildOutcome {
            status: BuildStatus::Failure,
            started_at: now,
            finished_at,
            duration_ms: 0,
            exit_code: None,
            git_hash: git_hash(&state.project_root).await,
            error_summary: Some(BuildOutcome::clamp_summary(e.to_string())),
            error_output_tail: None,
            builder_log_path: state.log_path.clone(),
        },
    };

    target_state.record_outcome(outcome.clone());
    if outcome.status == BuildStatus::Success {
        scheduler.record_focus(&state.target.name, finished_at);
        if let Some(output_path) = &state.target.output_path {
            let resolved = if output_path.is_absolute() {
                output_path.clone()
            } else {
                state.project_root.join(output_path)
            };
            target_state.set_artifact_info(crate::state_store::ArtifactInfo {
                output_path: Some(resolved),
                bundle_id: state.target.bundle_id.clone(),
            });
        }
    }
    target_state.write()?;

    Ok(outcome)
}

/// Best-effort `git rev-parse HEAD` in the project root, for `BuildOutcome`'s
/// `gitHash` (spec §3). `None` outside a git checkout or if `git` is absent;
/// never fails the build over it.
async fn git_hash(project_root: &std::path::Path) -> Option<String> {
    let project_root = project_root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let output = std::process::Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&project_root)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let hash = String::from_utf8(output.stdout).ok()?.trim().to_string();
        if hash.is_empty() {
            None
        } else {
            Some(hash)
        }
    })
    .await
    .ok()
    .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn target(command: &str) -> Target {
        Target {
            name: "app".to_string(),
            kind: TargetKind::Executable,
            enabled: true,
            build_command: command.to_string(),
            output_path: None,
            watch_paths: vec![],
            exclude_paths: vec![],
            settling_delay_ms: 20,
            max_retries: 0,
            environment: IndexMap::new(),
            bundle_id: None,
            timeout_ms: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_in(dir: &std::path::Path, t: Target, run_initial_build: bool) -> ControllerHandle {
        spawn(
            t,
            dir.to_path_buf(),
            "myproj".to_string(),
            dir.join("poltergeist.config.json"),
            dir.join("app.state"),
            dir.join("app.lock"),
            dir.join("app.log"),
            Arc::new(Scheduler::new(&crate::config::BuildScheduling::default())),
            run_initial_build,
        )
    }

    #[tokio::test]
    async fn test_force_build_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn_in(dir.path(), target("echo ok"), false);

        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        handle.send(ControllerMessage::ForceBuild { reply: reply_tx });
        let outcome = reply_rx.await.unwrap().unwrap();
        assert_eq!(outcome.status, BuildStatus::Success);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_file_changed_debounces_into_single_build() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("app.state");
        let handle = spawn_in(dir.path(), target("echo rebuilt"), false);

        handle.send(ControllerMessage::FileChanged(vec![PathBuf::from("src/a.ts")]));
        handle.send(ControllerMessage::FileChanged(vec![PathBuf::from("src/b.ts")]));
        handle.send(ControllerMessage::FileChanged(vec![PathBuf::from("src/a.ts")]));

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.shutdown().await;

        let state = TargetState::read(&state_path, Utc::now()).unwrap().unwrap();
        assert_eq!(state.build_stats.successful_builds.len(), 1);

        let log = std::fs::read_to_string(dir.path().join("app.log")).unwrap();
        assert!(log.contains("src/a.ts"));
        assert!(log.contains("src/b.ts"));
    }
}
