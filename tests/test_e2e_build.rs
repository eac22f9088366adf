mod common;

use common::{single_target_config, TestEnv};
use predicates::prelude::*;

/// One-shot `build` succeeds, writes state, and reports a zero exit code
/// (spec §6 CLI surface table).
#[test]
fn test_build_success_writes_state() {
    let env = TestEnv::new();
    env.write_config(&single_target_config("app", "true"));

    env.command()
        .args(["build", "app"])
        .assert()
        .success()
        .stdout(predicate::str::contains("app: build succeeded"));
}

/// A failing build command exits non-zero and surfaces an error summary.
#[test]
fn test_build_failure_reports_nonzero_exit() {
    let env = TestEnv::new();
    env.write_config(&single_target_config("app", "echo 'error: boom' 1>&2; exit 1"));

    env.command()
        .args(["build", "app", "--json"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("\"success\": false"));
}

/// `build` rejects an unknown target name with a suggestion rather than a
/// bare panic (spec §7 Configuration errors).
#[test]
fn test_build_unknown_target_fails_cleanly() {
    let env = TestEnv::new();
    env.write_config(&single_target_config("app", "true"));

    env.command().args(["build", "ap"]).assert().failure().code(1);
}

/// With no target named, `build` runs every enabled target.
#[test]
fn test_build_all_targets_when_omitted() {
    let env = TestEnv::new();
    env.write_config(
        r#"{
            "version": "1.0",
            "targets": [
                {"name": "one", "kind": "executable", "buildCommand": "true"},
                {"name": "two", "kind": "executable", "buildCommand": "true"}
            ]
        }"#,
    );

    env.command()
        .args(["build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("one: build succeeded"))
        .stdout(predicate::str::contains("two: build succeeded"));
}
