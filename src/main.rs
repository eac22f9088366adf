//! Binary entry point: initializes the logger, then hands off to the CLI
//! dispatcher for argument parsing and subcommand execution (spec §6).

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    poltergeist::logger::init();
    let code = poltergeist::cli::run().await;
    ExitCode::from(code as u8)
}
