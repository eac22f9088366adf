//! Process-wide environment lookups, resolved once and cached.
//!
//! Mirrors the teacher's `PITCHFORK_*` statics: a handful of `Lazy` values
//! computed from the environment at first use, so the rest of the crate
//! never calls `std::env::var` directly.

use once_cell::sync::Lazy;
use std::path::PathBuf;

pub static CWD: Lazy<PathBuf> =
    Lazy::new(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

/// Resolves the state/lock/daemon-info directory for this process.
///
/// Read fresh (not cached) so test harnesses can set `POLTERGEIST_STATE_DIR`
/// per-test and get an isolated directory, per spec §9 ("Test harnesses
/// override it via POLTERGEIST_STATE_DIR").
pub fn state_dir() -> PathBuf {
    var_path("POLTERGEIST_STATE_DIR").unwrap_or_else(|| {
        dirs::state_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("poltergeist")
    })
}

/// Disables `polter`'s one-shot automatic rebuild on recent build failure.
pub fn no_auto_rebuild() -> bool {
    var_flag("POLTERGEIST_NO_AUTO_REBUILD")
}

/// Diagnostic hook: makes the logger louder, used by tests.
pub fn debug_logger() -> bool {
    var_flag("POLTERGEIST_DEBUG_LOGGER")
}

/// Diagnostic hook: makes `clean` print every file it would remove.
pub fn debug_clean() -> bool {
    var_flag("POLTERGEIST_DEBUG_CLEAN")
}

/// Diagnostic hook: shortens timers/thresholds for faster test runs.
pub fn test_mode() -> bool {
    var_flag("POLTERGEIST_TEST_MODE")
}

/// Best-effort local hostname, embedded in `DaemonInfo`/`BuildLock` records
/// so an external reader on the same host can tell a live record from one
/// left behind by a daemon on a different machine sharing the state dir
/// (e.g. over a network filesystem).
pub fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string())
}

fn var_path(name: &str) -> Option<PathBuf> {
    std::env::var(name).ok().map(PathBuf::from)
}

fn var_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.to_lowercase();
            v == "1" || v == "true"
        })
        .unwrap_or(false)
}
