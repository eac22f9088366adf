mod common;

use common::{single_target_config, TestEnv};
use predicates::prelude::*;

/// `--all` removes every state file regardless of the `isActive` flag
/// left behind by a one-shot build (spec §6 `clean` row).
#[test]
fn test_clean_all_removes_active_state() {
    let env = TestEnv::new();
    env.write_config(&single_target_config("app", "true"));
    env.command().args(["build", "app"]).assert().success();

    let state_path = env.state_dir().join(format!(
        "project-{}-app.state",
        poltergeist::paths::ProjectIdentity::new(env.project_dir()).unwrap().project_hash
    ));
    assert!(state_path.exists());

    // The one-shot `build` CLI writes itself in as `daemonProcess` with
    // `isActive=true` and never flips it back (only a graceful daemon
    // shutdown does), so a bare `clean` would never touch this file;
    // `--all` is needed to force removal regardless of that flag.
    env.command()
        .args(["clean", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 1 stale state file"));

    assert!(!state_path.exists());
}

/// `--dry-run` reports what would be removed without touching the files.
#[test]
fn test_clean_dry_run_leaves_files() {
    let env = TestEnv::new();
    env.write_config(&single_target_config("app", "true"));
    env.command().args(["build", "app"]).assert().success();

    env.command()
        .args(["clean", "--all", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("would remove"));

    let entries: Vec<_> = std::fs::read_dir(env.state_dir()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

/// A state file written just now is not removed by the default staleness
/// window (7 days) without `--all`.
#[test]
fn test_clean_without_all_keeps_fresh_state() {
    let env = TestEnv::new();
    env.write_config(&single_target_config("app", "true"));
    env.command().args(["build", "app"]).assert().success();

    env.command()
        .args(["clean"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 0 stale state file"));
}
