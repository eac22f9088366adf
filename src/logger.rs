//! Hand-rolled logger (spec §4.A `DaemonLog`, SPEC_FULL §10 ambient stack).
//!
//! The teacher's own `logger.rs` is referenced by `mod logger;` in its
//! `main.rs` but was filtered out of the retrieved pack, so this is written
//! fresh in the surrounding idiom: `once_cell`-backed statics, `log::Level`
//! filtering throughout, and a `POLTERGEIST_LOG`/`POLTERGEIST_DEBUG_LOGGER`
//! pair of overrides mirroring the teacher's `PITCHFORK_LOG` statics in
//! `env.rs`.

use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;

static LOG_FILE: OnceCell<Mutex<std::fs::File>> = OnceCell::new();

struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} {:<5} {}: {}\n",
            chrono::Utc::now().to_rfc3339(),
            record.level(),
            record.target(),
            record.args()
        );
        eprint!("{line}");
        if let Some(file) = LOG_FILE.get() {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(line.as_bytes());
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = LOG_FILE.get() {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}

/// Installs the global logger, with a level derived from
/// `POLTERGEIST_LOG`/`POLTERGEIST_DEBUG_LOGGER` until a config is loaded and
/// calls [`set_level`] with its `logging.level`.
pub fn init() {
    if log::set_boxed_logger(Box::new(Logger)).is_ok() {
        log::set_max_level(level_from_env().to_level_filter());
    }
}

/// Routes subsequent log lines to `path` (in addition to stderr), called
/// once the daemon worker knows its project's `DaemonLog` path (spec §4.A).
/// Failure to open the file is not fatal; stderr logging continues either
/// way.
pub fn attach_file(path: &Path) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            let _ = LOG_FILE.set(Mutex::new(file));
        }
        Err(e) => log::warn!("failed to open daemon log {}: {e}", path.display()),
    }
}

/// Raises or lowers the active log level once a config is loaded, unless
/// `POLTERGEIST_DEBUG_LOGGER` pins it to debug.
pub fn set_level(config_level: Option<crate::config::LogLevel>) {
    if crate::env::debug_logger() {
        return;
    }
    if let Some(level) = config_level {
        log::set_max_level(level_filter(level));
    }
}

fn level_filter(level: crate::config::LogLevel) -> LevelFilter {
    match level {
        crate::config::LogLevel::Error => LevelFilter::Error,
        crate::config::LogLevel::Warn => LevelFilter::Warn,
        crate::config::LogLevel::Info => LevelFilter::Info,
        crate::config::LogLevel::Debug => LevelFilter::Debug,
    }
}

fn level_from_env() -> Level {
    if crate::env::debug_logger() {
        return Level::Debug;
    }
    std::env::var("POLTERGEIST_LOG")
        .ok()
        .and_then(|v| v.parse::<Level>().ok())
        .unwrap_or(Level::Info)
}
