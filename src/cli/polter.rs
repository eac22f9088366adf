use crate::error::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Freshness-aware run: waits for an in-flight build, retries a recent
/// failure once, then execs the target's artifact.
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Polter {
    target: String,
    /// Arguments forwarded to the target's artifact.
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
    /// Run even if the last build failed.
    #[clap(long)]
    force: bool,
    /// Fail immediately instead of waiting out an in-progress build.
    #[clap(long = "no-wait")]
    no_wait: bool,
    /// Milliseconds to wait for a build before giving up.
    #[clap(long, default_value_t = 30_000)]
    timeout: u64,
    #[clap(long)]
    verbose: bool,
    #[clap(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

impl Polter {
    pub async fn run(&self) -> Result<i32> {
        let opts = crate::polter::PolterOptions {
            force: self.force,
            no_wait: self.no_wait,
            timeout: Duration::from_millis(self.timeout),
            verbose: self.verbose,
        };
        crate::polter::run(&self.target, &self.args, self.config.as_deref(), opts).await?;
        // `crate::polter::run` only returns on failure; success execs in place.
        Ok(1)
    }
}
