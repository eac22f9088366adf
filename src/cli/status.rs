use crate::error::Result;
use crate::paths::ProjectIdentity;
use crate::state_store::{BuildStatus, TargetState};
use crate::target::Target;
use serde::Serialize;
use std::path::PathBuf;

/// Reports per-target status derived from state files.
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Status {
    #[clap(short = 'c', long = "config")]
    config: Option<PathBuf>,
    /// Only report this target.
    #[clap(short, long = "target")]
    target: Option<String>,
    #[clap(long)]
    json: bool,
}

#[derive(Serialize)]
struct TargetStatus {
    name: String,
    status: BuildStatus,
    daemon_active: bool,
    last_build_duration_ms: Option<u64>,
    last_build_error: Option<String>,
}

impl Status {
    pub async fn run(&self) -> Result<i32> {
        let config = super::load_config(self.config.as_deref())?;
        let project_root = super::project_root_of(&config);
        let identity = ProjectIdentity::new(&project_root)?;
        let state_dir = crate::env::state_dir();

        let targets: Vec<&Target> = match &self.target {
            Some(name) => vec![config.find_target(name)?],
            None => config.enabled_targets().collect(),
        };

        let rows: Vec<TargetStatus> = targets
            .into_iter()
            .map(|t| {
                let state_path = identity.state_file_path(&state_dir, &t.name);
                match TargetState::read_tolerant(&state_path) {
                    Some(state) => TargetStatus {
                        name: t.name.clone(),
                        status: state.status,
                        daemon_active: state.daemon_process.is_active,
                        last_build_duration_ms: state.last_build.as_ref().map(|b| b.duration_ms),
                        last_build_error: state.last_build_error.and_then(|b| b.error_summary),
                    },
                    None => TargetStatus {
                        name: t.name.clone(),
                        status: BuildStatus::Idle,
                        daemon_active: false,
                        last_build_duration_ms: None,
                        last_build_error: None,
                    },
                }
            })
            .collect();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&rows).expect("TargetStatus is always serializable"));
        } else {
            for row in &rows {
                print!("{}: {} (daemon {})", row.name, row.status, if row.daemon_active { "active" } else { "inactive" });
                if let Some(ms) = row.last_build_duration_ms {
                    print!(", last build {ms}ms");
                }
                if let Some(err) = &row.last_build_error {
                    print!(", last error: {err}");
                }
                println!();
            }
        }

        Ok(0)
    }
}
