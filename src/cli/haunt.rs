use crate::error::Result;
use std::path::PathBuf;

/// Starts the build daemon for this project, detached unless `--foreground`.
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Haunt {
    /// Config file path, searched upward from cwd if omitted.
    #[clap(short = 'c', long = "config")]
    config: Option<PathBuf>,
    /// Validate that this target exists before starting.
    #[clap(short, long = "target")]
    target: Option<String>,
    /// Run in the foreground instead of detaching.
    #[clap(short = 'f', long)]
    foreground: bool,
    #[clap(long)]
    verbose: bool,
    #[clap(long = "log-level")]
    log_level: Option<crate::config::LogLevel>,
}

impl Haunt {
    pub async fn run(&self) -> Result<i32> {
        let config = super::load_config(self.config.as_deref())?;
        if let Some(target) = &self.target {
            config.find_target(target)?;
        }
        if self.verbose {
            log::set_max_level(log::LevelFilter::Debug);
        }

        let project_root = super::project_root_of(&config);
        let state_dir = crate::env::state_dir();

        if self.foreground {
            crate::supervisor::run_daemon_worker(project_root, None, state_dir, self.log_level).await?;
            return Ok(0);
        }

        crate::supervisor::start_daemon(&project_root, &state_dir).await?;
        println!("poltergeist is haunting {}", project_root.display());
        Ok(0)
    }
}
