mod common;

use common::TestEnv;
use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;

fn write_executable_script(path: &std::path::Path, body: &str) {
    fs::write(path, body).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

/// With no state file recorded yet, `polter` warns and execs the resolved
/// artifact anyway, propagating its exit code (spec §4.J.3 "unknown"
/// status path).
#[test]
fn test_polter_runs_without_state_and_propagates_exit_code() {
    let env = TestEnv::new();
    let script = env.project_dir().join("app.sh");
    write_executable_script(&script, "#!/bin/sh\nexit 7\n");

    env.write_config(&format!(
        r#"{{
            "version": "1.0",
            "targets": [
                {{"name": "app", "kind": "executable", "buildCommand": "true", "outputPath": "app.sh"}}
            ]
        }}"#
    ));

    env.command().args(["polter", "app"]).assert().code(7);
}

/// `polter` rejects a target whose kind isn't `executable` (spec §4.J.2).
#[test]
fn test_polter_rejects_non_executable_target() {
    let env = TestEnv::new();
    env.write_config(
        r#"{
            "version": "1.0",
            "targets": [
                {"name": "lib", "kind": "library", "buildCommand": "true"}
            ]
        }"#,
    );

    env.command()
        .args(["polter", "lib"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("executable").or(predicate::str::contains("kind")));
}

/// Forwarded arguments reach the exec'd artifact unchanged.
#[test]
fn test_polter_forwards_trailing_args() {
    let env = TestEnv::new();
    let script = env.project_dir().join("echo-args.sh");
    write_executable_script(&script, "#!/bin/sh\necho \"args:$@\"\n");

    env.write_config(&format!(
        r#"{{
            "version": "1.0",
            "targets": [
                {{"name": "app", "kind": "executable", "buildCommand": "true", "outputPath": "echo-args.sh"}}
            ]
        }}"#
    ));

    env.command()
        .args(["polter", "app", "--", "--flag", "value"])
        .assert()
        .success()
        .stdout(predicate::str::contains("args:--flag value"));
}
