use crate::error::Result;
use std::path::PathBuf;

/// Hidden entry point spawned by `haunt`'s detached child: runs the
/// Orchestrator in the foreground and signals readiness on `--socket`.
#[derive(Debug, clap::Args)]
pub struct DaemonWorker {
    #[clap(long = "project-root")]
    project_root: PathBuf,
    #[clap(long = "socket")]
    socket: PathBuf,
}

impl DaemonWorker {
    pub async fn run(&self) -> Result<i32> {
        let state_dir = crate::env::state_dir();
        crate::supervisor::run_daemon_worker(self.project_root.clone(), Some(self.socket.clone()), state_dir, None)
            .await?;
        Ok(0)
    }
}
