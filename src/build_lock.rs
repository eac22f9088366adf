//! Build Lock (spec §4.C): per-target mutual exclusion across processes,
//! so two `poltergeist build` invocations (or a daemon and a CLI build)
//! never run the same target's build command concurrently.
//!
//! Grounded on the `tundra` daemon lockfile's `O_CREAT | O_EXCL` acquire and
//! liveness-checked stale-lock recovery, adapted from a single global
//! singleton lock to one lock file per (project, target) and from
//! "liveness only" to "liveness OR heartbeat age" staleness (spec §9 open
//! question: a lock is stale if its pid is dead OR its heartbeat is older
//! than 60s, whichever comes first).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

pub const STALE_HEARTBEAT_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildLockRecord {
    pub pid: u32,
    pub hostname: String,
    pub target: String,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub command: String,
}

impl BuildLockRecord {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        !pid_alive(self.pid) || now.signed_duration_since(self.heartbeat_at).num_seconds() > STALE_HEARTBEAT_SECS
    }
}

pub enum AcquireOutcome {
    Acquired(BuildLock),
    Held(BuildLockRecord),
}

/// A held lock. Dropping it without calling [`BuildLock::release`] leaves
/// the lock file in place; a crashed holder's lock is reclaimed by the next
/// acquirer once it goes stale, same as the daemon info singleton gate.
pub struct BuildLock {
    path: PathBuf,
    record: BuildLockRecord,
}

impl BuildLock {
    /// Attempts to acquire the lock for `target` at `path`. If an existing
    /// lock is found and still live, returns `Held` with its record so the
    /// caller can report who holds it. If the existing lock is stale, it is
    /// removed and acquisition retried once.
    pub fn try_acquire(path: &Path, target: &str, command: &str, now: DateTime<Utc>) -> std::io::Result<AcquireOutcome> {
        for attempt in 0..2 {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let record = BuildLockRecord {
                pid: std::process::id(),
                hostname: crate::env::hostname(),
                target: target.to_string(),
                acquired_at: now,
                heartbeat_at: now,
                command: command.to_string(),
            };
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let json = serde_json::to_string_pretty(&record)
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                    file.write_all(json.as_bytes())?;
                    file.sync_all()?;
                    return Ok(AcquireOutcome::Acquired(BuildLock {
                        path: path.to_path_buf(),
                        record,
                    }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => match read(path) {
                    Some(existing) if !existing.is_stale(now) => {
                        return Ok(AcquireOutcome::Held(existing));
                    }
                    _ if attempt == 0 => {
                        let _ = std::fs::remove_file(path);
                        continue;
                    }
                    Some(existing) => return Ok(AcquireOutcome::Held(existing)),
                    None => continue,
                },
                Err(e) => return Err(e),
            }
        }
        unreachable!("loop always returns within two attempts")
    }

    /// Refreshes `heartbeatAt` so a long build is not reclaimed as stale.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> std::io::Result<()> {
        self.record.heartbeat_at = now;
        crate::state_store::write_atomic(&self.path, &self.record).map_err(to_io_error)
    }

    pub fn release(self) -> std::io::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn record(&self) -> &BuildLockRecord {
        &self.record
    }
}

/// Forcibly removes the lock file regardless of liveness, for `--force`
/// build invocations and `poltergeist clean`.
pub fn force_unlock(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

pub fn is_held(path: &Path, now: DateTime<Utc>) -> bool {
    read(path).is_some_and(|r| !r.is_stale(now))
}

fn read(path: &Path) -> Option<BuildLockRecord> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn to_io_error(err: crate::error::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
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

    #[test]
    fn test_acquire_then_held_by_self() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.lock");
        let now = Utc::now();
        let outcome = BuildLock::try_acquire(&path, "app", "make", now).unwrap();
        let lock = match outcome {
            AcquireOutcome::Acquired(lock) => lock,
            AcquireOutcome::Held(_) => panic!("expected to acquire"),
        };
        assert!(is_held(&path, now));
        lock.release().unwrap();
        assert!(!is_held(&path, now));
    }

    #[test]
    fn test_second_acquire_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.lock");
        let now = Utc::now();
        let _lock = match BuildLock::try_acquire(&path, "app", "make", now).unwrap() {
            AcquireOutcome::Acquired(lock) => lock,
            AcquireOutcome::Held(_) => panic!("expected to acquire"),
        };
        match BuildLock::try_acquire(&path, "app", "make", now).unwrap() {
            AcquireOutcome::Held(record) => assert_eq!(record.pid, std::process::id()),
            AcquireOutcome::Acquired(_) => panic!("expected held"),
        }
    }

    #[test]
    fn test_stale_heartbeat_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.lock");
        let old = Utc::now() - chrono::Duration::seconds(120);
        let record = BuildLockRecord {
            pid: std::process::id(),
            hostname: crate::env::hostname(),
            target: "app".to_string(),
            acquired_at: old,
            heartbeat_at: old,
            command: "make".to_string(),
        };
        std::fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();

        let now = Utc::now();
        match BuildLock::try_acquire(&path, "app", "make", now).unwrap() {
            AcquireOutcome::Acquired(_) => {}
            AcquireOutcome::Held(_) => panic!("stale lock should have been reclaimed"),
        }
    }

    #[test]
    fn test_dead_pid_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.lock");
        let now = Utc::now();
        let record = BuildLockRecord {
            pid: 4_000_000,
            hostname: crate::env::hostname(),
            target: "app".to_string(),
            acquired_at: now,
            heartbeat_at: now,
            command: "make".to_string(),
        };
        std::fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();

        match BuildLock::try_acquire(&path, "app", "make", now).unwrap() {
            AcquireOutcome::Acquired(_) => {}
            AcquireOutcome::Held(_) => panic!("dead-pid lock should have been reclaimed"),
        }
    }

    #[test]
    fn test_force_unlock_removes_live_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.lock");
        let now = Utc::now();
        let _lock = match BuildLock::try_acquire(&path, "app", "make", now).unwrap() {
            AcquireOutcome::Acquired(lock) => lock,
            AcquireOutcome::Held(_) => panic!("expected to acquire"),
        };
        force_unlock(&path).unwrap();
        assert!(!path.exists());
    }
}
