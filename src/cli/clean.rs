use crate::error::Result;
use crate::state_store::TargetState;
use chrono::Utc;

const DEFAULT_STALE_DAYS: i64 = 7;

/// Removes stale state files (`daemonProcess.isActive=false` AND
/// `lastHeartbeatAt` older than N days), or all of them.
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Clean {
    /// Remove every state file regardless of staleness.
    #[clap(long)]
    all: bool,
    /// Staleness threshold in days.
    #[clap(short = 'd', long = "days", default_value_t = DEFAULT_STALE_DAYS)]
    days: i64,
    /// Print what would be removed without removing it.
    #[clap(long = "dry-run")]
    dry_run: bool,
}

impl Clean {
    pub async fn run(&self) -> Result<i32> {
        let state_dir = crate::env::state_dir();
        let now = Utc::now();
        let threshold = chrono::Duration::days(self.days);
        let verbose = self.dry_run || crate::env::debug_clean();

        let mut removed = 0usize;
        for path in crate::state_store::enumerate(&state_dir)? {
            let stale = self.all
                || TargetState::read_tolerant(&path)
                    .map(|s| {
                        !s.daemon_process.is_active
                            && now.signed_duration_since(s.daemon_process.last_heartbeat_at) > threshold
                    })
                    .unwrap_or(true);

            if !stale {
                continue;
            }

            if verbose {
                println!("{} {}", if self.dry_run { "would remove" } else { "removing" }, path.display());
            }
            if !self.dry_run {
                crate::state_store::remove(&path)?;
                removed += 1;
            }
        }

        if !self.dry_run {
            println!("removed {removed} stale state file(s)");
        }
        Ok(0)
    }
}
