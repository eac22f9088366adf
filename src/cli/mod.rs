//! CLI surface (spec §4.J table): one `clap::Args` struct per subcommand,
//! following the teacher's `cli/*.rs` struct-per-file layout and its
//! `visible_alias` convention for the `haunt`/`start` and `stop`/`rest`
//! pairs.
//!
//! Per spec §1's Non-goal on "human-oriented output formatting", every
//! command prints plain greppable text (plus an optional `--json` blob
//! where the table calls for one); no table/TUI crate is pulled in for
//! this.

use crate::config::Config;
use crate::error::{ConfigError, Error, Result};
use std::path::{Path, PathBuf};

mod build;
mod clean;
mod daemon_worker;
mod haunt;
mod list;
mod polter;
mod restart;
mod status;
mod stop;

#[derive(Debug, clap::Parser)]
#[clap(name = "poltergeist", version, about = "Persistent per-project build-on-change daemon")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    #[clap(visible_alias = "start")]
    Haunt(haunt::Haunt),
    #[clap(visible_alias = "rest")]
    Stop(stop::Stop),
    Restart(restart::Restart),
    Status(status::Status),
    Build(build::Build),
    List(list::List),
    Clean(clean::Clean),
    Polter(polter::Polter),
    #[clap(hide = true, name = "daemon-worker")]
    DaemonWorker(daemon_worker::DaemonWorker),
}

/// Parses argv, dispatches to the selected subcommand, and converts the
/// result into a process exit code (spec §7: only the CLI layer turns a
/// typed error into a message + exit code).
pub async fn run() -> i32 {
    let args = <Cli as clap::Parser>::parse();
    let result = match args.command {
        Command::Haunt(cmd) => cmd.run().await,
        Command::Stop(cmd) => cmd.run().await,
        Command::Restart(cmd) => cmd.run().await,
        Command::Status(cmd) => cmd.run().await,
        Command::Build(cmd) => cmd.run().await,
        Command::List(cmd) => cmd.run().await,
        Command::Clean(cmd) => cmd.run().await,
        Command::Polter(cmd) => cmd.run().await,
        Command::DaemonWorker(cmd) => cmd.run().await,
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            1
        }
    }
}

/// Loads the project config from `-c/--config` if given, else by walking up
/// from the current directory (spec §4.J.1's discovery rule, shared by
/// every command that needs "the config for this project").
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => {
            let cwd = crate::env::CWD.clone();
            let found = Config::find_up(&cwd)
                .ok_or_else(|| Error::Config(ConfigError::NotFound { path: cwd.clone() }))?;
            Config::load(&found)
        }
    }
}

fn project_root_of(config: &Config) -> PathBuf {
    config
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| crate::env::CWD.clone())
}
