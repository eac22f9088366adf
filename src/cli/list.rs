use crate::error::Result;
use std::path::PathBuf;

/// Enumerates configured targets.
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct List {
    #[clap(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

impl List {
    pub async fn run(&self) -> Result<i32> {
        let config = super::load_config(self.config.as_deref())?;
        for target in &config.targets {
            println!(
                "{}\t{}\t{}",
                target.name,
                target.kind,
                if target.enabled { "enabled" } else { "disabled" }
            );
        }
        Ok(0)
    }
}
