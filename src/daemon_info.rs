//! Daemon Info record (spec §4.H): the single JSON record that marks "a
//! daemon is running for this project", keyed by project identity.
//!
//! Uses the same atomic-create gate as the Build Lock, generalized to a
//! per-project singleton rather than a per-target exclusion: exactly one
//! daemon may hold this file for a given project at a time.

use crate::error::{DaemonError, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonInfo {
    pub schema_version: String,
    pub pid: u32,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub log_file: PathBuf,
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    /// Not part of spec §3's field list; the one narrowed remainder of the
    /// teacher's much larger IPC surface, used only for the startup
    /// readiness handshake (spec §4.H.3).
    pub ipc_socket: PathBuf,
    pub version: String,
}

impl DaemonInfo {
    /// Atomically creates `path` with this record, failing if a live daemon
    /// already holds it. A dead-pid record is treated as abandoned and
    /// replaced in place.
    pub fn claim(path: &Path, info: DaemonInfo, now: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                write_record(&mut file, &info)?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if let Some(existing) = Self::read(path) {
                    if pid_alive(existing.pid) {
                        return Err(Error::Daemon(DaemonError::AlreadyRunning { pid: existing.pid }));
                    }
                }
                let _ = now;
                std::fs::remove_file(path)?;
                let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
                write_record(&mut file, &info)?;
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn read(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Reads the record only if its pid is still alive; removes it otherwise.
    pub fn read_live(path: &Path) -> Option<Self> {
        let info = Self::read(path)?;
        if pid_alive(info.pid) {
            Some(info)
        } else {
            let _ = std::fs::remove_file(path);
            None
        }
    }

    pub fn release(path: &Path) -> std::io::Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn write_record(file: &mut std::fs::File, info: &DaemonInfo) -> Result<()> {
    let json = serde_json::to_string_pretty(info)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pid: u32) -> DaemonInfo {
        DaemonInfo {
            schema_version: "1.0".to_string(),
            pid,
            hostname: crate::env::hostname(),
            started_at: Utc::now(),
            log_file: PathBuf::from("/tmp/project-daemon.log"),
            project_root: PathBuf::from("/tmp/project"),
            config_path: PathBuf::from("/tmp/project/poltergeist.config.json"),
            ipc_socket: PathBuf::from("/tmp/project.sock"),
            version: "0.1.0".to_string(),
        }
    }

    #[test]
    fn test_claim_then_reclaim_fails_while_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        DaemonInfo::claim(&path, sample(std::process::id()), Utc::now()).unwrap();
        let err = DaemonInfo::claim(&path, sample(std::process::id()), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Daemon(DaemonError::AlreadyRunning { .. })));
    }

    #[test]
    fn test_claim_replaces_dead_pid_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        std::fs::write(&path, serde_json::to_string(&sample(4_000_000)).unwrap()).unwrap();
        DaemonInfo::claim(&path, sample(std::process::id()), Utc::now()).unwrap();
        let info = DaemonInfo::read(&path).unwrap();
        assert_eq!(info.pid, std::process::id());
    }

    #[test]
    fn test_read_live_removes_dead_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        std::fs::write(&path, serde_json::to_string(&sample(4_000_000)).unwrap()).unwrap();
        assert!(DaemonInfo::read_live(&path).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_release_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        DaemonInfo::claim(&path, sample(std::process::id()), Utc::now()).unwrap();
        DaemonInfo::release(&path).unwrap();
        assert!(!path.exists());
    }
}
