//! Daemon readiness handshake (spec §4.H): a tiny local-socket ping so
//! `poltergeist haunt` can block until the detached daemon child has
//! actually finished startup, instead of racing it.
//!
//! The teacher uses `interprocess` for a full request/response protocol
//! between the CLI and every managed daemon (`ipc/`). This crate has no
//! equivalent surface to manage (spec's Non-goals exclude a control
//! protocol beyond start/stop/status), so only the readiness-ping half of
//! that dependency is used here.

use crate::error::{DaemonError, Error, Result};
use exponential_backoff::Backoff;
use interprocess::local_socket::tokio::{Listener, Stream};
use interprocess::local_socket::{GenericFilePath, ListenerOptions, ToFsName};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const READY_MESSAGE: &[u8] = b"ready\n";
const CONNECT_MIN_DELAY: Duration = Duration::from_millis(20);
const CONNECT_MAX_DELAY: Duration = Duration::from_millis(500);
const MAX_CONNECT_ATTEMPTS: u32 = 40;

/// Binds the readiness socket. The daemon calls this before doing any real
/// startup work, then calls [`signal_ready`] once the Orchestrator is
/// actually accepting watch events.
pub fn bind(socket_path: &Path) -> Result<Listener> {
    if socket_path.exists() {
        let _ = std::fs::remove_file(socket_path);
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let name = socket_path
        .to_fs_name::<GenericFilePath>()
        .map_err(Error::Io)?;
    ListenerOptions::new().name(name).create_tokio().map_err(Error::Io)
}

/// Accepts exactly one connection and writes the ready message, then
/// returns. Called once from the daemon's startup path.
pub async fn signal_ready(listener: &Listener) -> Result<()> {
    let mut conn = listener.accept().await?;
    conn.write_all(READY_MESSAGE).await?;
    Ok(())
}

/// Polls `socket_path` until a connection succeeds and the ready message
/// is read, or `timeout` elapses. Retries on an exponential backoff, the
/// same schedule the teacher uses for its own IPC client reconnect loop.
pub async fn wait_for_ready(socket_path: &Path, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;

    for duration in Backoff::new(MAX_CONNECT_ATTEMPTS, CONNECT_MIN_DELAY, CONNECT_MAX_DELAY) {
        if tokio::time::Instant::now() >= deadline {
            break;
        }

        if let Ok(name) = socket_path.to_fs_name::<GenericFilePath>() {
            if let Ok(mut stream) = Stream::connect(name).await {
                let mut buf = [0u8; READY_LEN];
                if stream.read_exact(&mut buf).await.is_ok() {
                    return Ok(());
                }
            }
        }

        let Some(delay) = duration else { break };
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(delay.min(remaining)).await;
    }

    Err(Error::Daemon(DaemonError::StartupTimeout { timeout_ms: timeout.as_millis() as u64 }))
}

const READY_LEN: usize = READY_MESSAGE.len();
