//! Daemon Supervisor (spec §4.H): the process-management layer above the
//! Orchestrator — claims the per-project singleton, detaches a background
//! child on `haunt`, and tears the child down cleanly on `rest`.
//!
//! Grounded on the teacher's `supervisor/mod.rs` `start_in_background`
//! (detached `duct` spawn of its own binary) and its signal-handling
//! `close()` shutdown sequence, narrowed from "one daemon managing many
//! named processes" to "one daemon per project running its own
//! Orchestrator in-process".

use crate::config::Config;
use crate::daemon_info::DaemonInfo;
use crate::error::{DaemonError, Error, Result};
use crate::orchestrator::Orchestrator;
use crate::paths::ProjectIdentity;
use crate::procs::PROCS;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// `poltergeist haunt`: claims the singleton, spawns a detached child
/// running the hidden `daemon-worker` subcommand, and blocks until that
/// child's Orchestrator reports ready.
pub async fn start_daemon(project_root: &Path, state_dir: &Path) -> Result<()> {
    let identity = ProjectIdentity::new(project_root)?;
    let daemon_info_path = identity.daemon_info_path(state_dir);

    if let Some(existing) = DaemonInfo::read_live(&daemon_info_path) {
        return Err(Error::Daemon(DaemonError::AlreadyRunning { pid: existing.pid }));
    }

    let socket_path = state_dir.join(format!(
        "{}.sock",
        identity.daemon_info_path(state_dir).file_stem().and_then(|s| s.to_str()).unwrap_or("daemon")
    ));

    let exe = std::env::current_exe()?;
    let child = duct::cmd!(&exe, "daemon-worker", "--project-root", project_root, "--socket", &socket_path)
        .stdout_null()
        .stderr_null()
        .start()
        .map_err(Error::Io)?;

    let pid = child.pids().first().copied().ok_or_else(|| Error::Daemon(DaemonError::StartupTimeout { timeout_ms: STARTUP_TIMEOUT.as_millis() as u64 }))?;

    crate::ipc::wait_for_ready(&socket_path, STARTUP_TIMEOUT).await.map_err(|_| {
        Error::Daemon(DaemonError::StartupTimeout { timeout_ms: STARTUP_TIMEOUT.as_millis() as u64 })
    })?;

    // The child owns its own DaemonInfo claim once it's up; this second
    // check just guards against a race where it crashed between binding
    // the readiness socket and claiming the record.
    if DaemonInfo::read_live(&daemon_info_path).map(|i| i.pid) != Some(pid) {
        return Err(Error::Daemon(DaemonError::StartupTimeout { timeout_ms: STARTUP_TIMEOUT.as_millis() as u64 }));
    }

    Ok(())
}

/// `poltergeist rest`: signals the running daemon to stop and waits for it
/// to exit, escalating to SIGKILL via [`crate::procs`] if it doesn't.
pub async fn stop_daemon(project_root: &Path, state_dir: &Path) -> Result<()> {
    let identity = ProjectIdentity::new(project_root)?;
    let daemon_info_path = identity.daemon_info_path(state_dir);

    let Some(info) = DaemonInfo::read_live(&daemon_info_path) else {
        return Err(Error::Daemon(DaemonError::NotRunning));
    };

    if !PROCS.kill_async(info.pid).await {
        return Err(Error::Daemon(DaemonError::StopFailed { pid: info.pid }));
    }
    DaemonInfo::release(&daemon_info_path)?;
    Ok(())
}

pub fn status(project_root: &Path, state_dir: &Path) -> Result<Option<DaemonInfo>> {
    let identity = ProjectIdentity::new(project_root)?;
    Ok(DaemonInfo::read_live(&identity.daemon_info_path(state_dir)))
}

/// Entry point for the daemon worker: claims the singleton, optionally
/// binds and signals the readiness socket (only the detached `daemon-worker`
/// subcommand passes one; `haunt --foreground` runs with `socket_path =
/// None` since nothing is waiting on the other end), builds the
/// Orchestrator, and runs until a shutdown signal arrives.
pub async fn run_daemon_worker(
    project_root: PathBuf,
    socket_path: Option<PathBuf>,
    state_dir: PathBuf,
    log_level_override: Option<crate::config::LogLevel>,
) -> Result<()> {
    let identity = ProjectIdentity::new(&project_root)?;
    let daemon_info_path = identity.daemon_info_path(&state_dir);
    let now = Utc::now();

    let config_path = Config::find_up(&project_root)
        .ok_or_else(|| Error::Config(crate::error::ConfigError::NotFound { path: project_root.clone() }))?;
    let config = Config::load(&config_path)?;

    let log_file = identity.daemon_log_path(&state_dir);
    crate::logger::attach_file(&log_file);
    crate::logger::set_level(log_level_override.or_else(|| config.logging.as_ref().map(|l| l.level)));

    DaemonInfo::claim(
        &daemon_info_path,
        DaemonInfo {
            schema_version: "1.0".to_string(),
            pid: std::process::id(),
            hostname: crate::env::hostname(),
            started_at: now,
            log_file: log_file.clone(),
            project_root: identity.canonical_root.clone(),
            config_path: config.path.clone(),
            ipc_socket: socket_path.clone().unwrap_or_else(|| state_dir.join("unused.sock")),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        now,
    )?;

    let orchestrator = Orchestrator::start(config, identity, state_dir.clone()).await?;

    let listener = match &socket_path {
        Some(path) => {
            let listener = crate::ipc::bind(path)?;
            crate::ipc::signal_ready(&listener).await?;
            Some(listener)
        }
        None => None,
    };

    let (reload_tx, reload_rx) = tokio::sync::mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    install_signal_handlers(shutdown_tx);
    let config_watch_handle = spawn_config_watcher(config_path.clone(), reload_tx);

    orchestrator.run(reload_rx, shutdown_rx).await;
    config_watch_handle.abort();

    drop(listener);
    DaemonInfo::release(&daemon_info_path)?;
    if let Some(path) = &socket_path {
        let _ = std::fs::remove_file(path);
    }
    Ok(())
}

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls `config_path`'s mtime and, on change, re-parses and validates it
/// (spec §4.I `load`) and forwards the new `Config` to the Orchestrator
/// (spec §4.G hot reload). A parse/validation failure is logged and the
/// previous config is left running untouched — the reload is only ever
/// applied on a successful load.
fn spawn_config_watcher(config_path: PathBuf, reload_tx: tokio::sync::mpsc::UnboundedSender<Config>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_modified = std::fs::metadata(&config_path).and_then(|m| m.modified()).ok();
        loop {
            tokio::time::sleep(CONFIG_POLL_INTERVAL).await;
            let Ok(modified) = std::fs::metadata(&config_path).and_then(|m| m.modified()) else {
                continue;
            };
            if last_modified == Some(modified) {
                continue;
            }
            last_modified = Some(modified);
            match Config::load(&config_path) {
                Ok(config) => {
                    if reload_tx.send(config).is_err() {
                        break;
                    }
                }
                Err(e) => log::error!("config reload failed, keeping previous config: {e}"),
            }
        }
    })
}

#[cfg(unix)]
fn install_signal_handlers(shutdown_tx: tokio::sync::oneshot::Sender<()>) {
    use tokio::signal::unix::{signal, SignalKind};
    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("failed to register SIGTERM handler: {e}");
                return;
            }
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("failed to register SIGINT handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => {}
            _ = int.recv() => {}
        }
        let _ = shutdown_tx.send(());
    });
}

#[cfg(not(unix))]
fn install_signal_handlers(shutdown_tx: tokio::sync::oneshot::Sender<()>) {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });
}
