use crate::error::{DaemonError, Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Stops then restarts the daemon for this project.
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Restart {
    /// Config file path, searched upward from cwd if omitted.
    #[clap(short = 'c', long = "config")]
    config: Option<PathBuf>,
    /// Don't fail if the daemon wasn't already running.
    #[clap(short = 'f', long)]
    force: bool,
}

impl Restart {
    pub async fn run(&self) -> Result<i32> {
        let config = super::load_config(self.config.as_deref())?;
        let project_root = super::project_root_of(&config);
        let state_dir = crate::env::state_dir();

        match crate::supervisor::stop_daemon(&project_root, &state_dir).await {
            Ok(()) => {}
            Err(Error::Daemon(DaemonError::NotRunning)) if self.force => {}
            Err(e) => return Err(e),
        }

        tokio::time::sleep(Duration::from_secs(1)).await;

        crate::supervisor::start_daemon(&project_root, &state_dir).await?;
        println!("poltergeist restarted for {}", project_root.display());
        Ok(0)
    }
}
