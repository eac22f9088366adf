use crate::build_lock::{self, AcquireOutcome};
use crate::builder;
use crate::error::{Error, LockError, Result};
use crate::paths::ProjectIdentity;
use crate::state_store::{BuildOutcome, BuildStatus, TargetState};
use crate::target::Target;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// One-shot build, bypassing the daemon's watcher but respecting the Build
/// Lock.
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Build {
    /// Target to build; all enabled targets if omitted.
    target: Option<String>,
    /// Bypass a held Build Lock by forcibly removing it first.
    #[clap(long)]
    force: bool,
    #[clap(long)]
    json: bool,
    #[clap(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

#[derive(Serialize)]
struct BuildResult {
    target: String,
    success: bool,
    duration_ms: u64,
    error_summary: Option<String>,
}

impl Build {
    pub async fn run(&self) -> Result<i32> {
        let config = super::load_config(self.config.as_deref())?;
        let project_root = super::project_root_of(&config);
        let identity = ProjectIdentity::new(&project_root)?;
        let state_dir = crate::env::state_dir();

        let targets: Vec<&Target> = match &self.target {
            Some(name) => vec![config.find_target(name)?],
            None => config.enabled_targets().collect(),
        };

        let mut results = Vec::with_capacity(targets.len());
        let mut all_succeeded = true;

        for target in targets {
            let result = self.build_one(&identity, &state_dir, &config.path, target).await?;
            all_succeeded &= result.success;
            results.push(result);
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&results).expect("BuildResult is always serializable"));
        } else {
            for result in &results {
                if result.success {
                    println!("{}: build succeeded ({}ms)", result.target, result.duration_ms);
                } else {
                    println!(
                        "{}: build failed ({}ms){}",
                        result.target,
                        result.duration_ms,
                        result.error_summary.as_ref().map(|s| format!(" - {s}")).unwrap_or_default()
                    );
                }
            }
        }

        Ok(if all_succeeded { 0 } else { 1 })
    }

    async fn build_one(
        &self,
        identity: &ProjectIdentity,
        state_dir: &std::path::Path,
        config_path: &std::path::Path,
        target: &Target,
    ) -> Result<BuildResult> {
        let lock_path = identity.lock_file_path(state_dir, &target.name);
        let state_path = identity.state_file_path(state_dir, &target.name);
        let now = Utc::now();

        if self.force {
            build_lock::force_unlock(&lock_path).map_err(Error::Io)?;
        }

        let lock = match build_lock::BuildLock::try_acquire(&lock_path, &target.name, &target.build_command, now)
            .map_err(Error::Io)?
        {
            AcquireOutcome::Acquired(lock) => lock,
            AcquireOutcome::Held(_) => {
                return Err(Error::Lock(LockError::AlreadyBuilding { target: target.name.clone() }));
            }
        };

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
        .await?;
        let _ = lock.release();

        let outcome = BuildOutcome {
            status: if output.success { BuildStatus::Success } else { BuildStatus::Failure },
            started_at: now,
            finished_at: Utc::now(),
            duration_ms: output.duration.as_millis() as u64,
            exit_code: output.exit_code,
            git_hash: None,
            error_summary: output.error_summary.clone(),
            error_output_tail: (!output.error_output_tail.is_empty()).then(|| output.error_output_tail.clone()),
            builder_log_path: log_path,
        };

        let mut state = TargetState::initialize(
            &state_path,
            &target.name,
            target.kind,
            identity.canonical_root.clone(),
            identity.project_name.clone(),
            config_path.to_path_buf(),
            Utc::now(),
        )?;
        state.record_outcome(outcome);
        state.write()?;

        Ok(BuildResult {
            target: target.name.clone(),
            success: output.success,
            duration_ms: output.duration.as_millis() as u64,
            error_summary: output.error_summary,
        })
    }
}
