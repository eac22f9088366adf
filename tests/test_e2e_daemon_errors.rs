mod common;

use common::{single_target_config, TestEnv};

/// `stop` on a project with no running daemon fails with exit code 1
/// (spec §6 CLI surface table; spec §7 daemon-lifecycle errors).
#[test]
fn test_stop_without_daemon_fails() {
    let env = TestEnv::new();
    env.write_config(&single_target_config("app", "true"));

    env.command().arg("stop").assert().failure().code(1);
}

/// `haunt -t <unknown>` rejects before attempting to spawn anything.
#[test]
fn test_haunt_validates_target_before_spawning() {
    let env = TestEnv::new();
    env.write_config(&single_target_config("app", "true"));

    env.command()
        .args(["haunt", "-t", "nope"])
        .assert()
        .failure()
        .code(1);
}

/// Missing config is a fatal, clearly reported error (spec §7.1).
#[test]
fn test_missing_config_fails_cleanly() {
    let env = TestEnv::new();
    env.command().arg("list").assert().failure().code(1);
}

/// An unsupported config version fails the whole load.
#[test]
fn test_unsupported_config_version_fails() {
    let env = TestEnv::new();
    env.write_config(r#"{"version":"2.0","targets":[]}"#);

    env.command().arg("list").assert().failure().code(1);
}
