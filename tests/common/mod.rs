#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Isolated project + state directory for a black-box CLI run, mirroring
/// the teacher's `tests/common/mod.rs` `TestEnv` but pointed at
/// `POLTERGEIST_STATE_DIR` instead of a fake `$HOME`.
pub struct TestEnv {
    _root: TempDir,
    project_dir: PathBuf,
    state_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let project_dir = root.path().join("project");
        let state_dir = root.path().join("state");
        fs::create_dir_all(&project_dir).unwrap();
        fs::create_dir_all(&state_dir).unwrap();
        Self { _root: root, project_dir, state_dir }
    }

    pub fn project_dir(&self) -> &std::path::Path {
        &self.project_dir
    }

    pub fn write_config(&self, json: &str) -> PathBuf {
        let path = self.project_dir.join("poltergeist.config.json");
        fs::write(&path, json).unwrap();
        path
    }

    /// Builds a `poltergeist` invocation with `POLTERGEIST_STATE_DIR`
    /// pinned to this env's isolated directory and cwd set to the project.
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("poltergeist").unwrap();
        cmd.current_dir(&self.project_dir).env("POLTERGEIST_STATE_DIR", &self.state_dir);
        cmd
    }

    pub fn state_dir(&self) -> &std::path::Path {
        &self.state_dir
    }
}

pub fn single_target_config(name: &str, build_command: &str) -> String {
    format!(
        r#"{{
            "version": "1.0",
            "targets": [
                {{"name": "{name}", "kind": "executable", "buildCommand": "{build_command}"}}
            ]
        }}"#
    )
}
