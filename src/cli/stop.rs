use crate::error::Result;
use std::path::PathBuf;

/// Stops the running daemon for this project.
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Stop {
    /// Config file path, searched upward from cwd if omitted.
    #[clap(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

impl Stop {
    pub async fn run(&self) -> Result<i32> {
        let config = super::load_config(self.config.as_deref())?;
        let project_root = super::project_root_of(&config);
        let state_dir = crate::env::state_dir();
        crate::supervisor::stop_daemon(&project_root, &state_dir).await?;
        println!("poltergeist has put {} to rest", project_root.display());
        Ok(0)
    }
}
