//! Paths and schedule configuration loading.
//!
//! Everything lives under ~/.hallpass:
//! - state.json (attendance records and pass logs)
//! - schedules.json (period tables and rosters)
//! - config.toml (daemon runtime settings)
//! - station.json (the scan station's selected schedule)
//! - daemon.sock (daemon listen socket)

use std::path::PathBuf;

use crate::error::{PassError, Result};
use crate::schedule::ScheduleConfig;

/// Returns the hallpass data directory (~/.hallpass).
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".hallpass"))
}

/// Returns the path to the persisted attendance state.
pub fn state_path() -> Option<PathBuf> {
    data_dir().map(|d| d.join("state.json"))
}

/// Returns the path to the schedule configuration file.
pub fn schedules_path() -> Option<PathBuf> {
    data_dir().map(|d| d.join("schedules.json"))
}

/// Returns the path to the daemon runtime configuration.
pub fn runtime_config_path() -> Option<PathBuf> {
    data_dir().map(|d| d.join("config.toml"))
}

/// Returns the path to the scan station's saved schedule selection.
pub fn station_path() -> Option<PathBuf> {
    data_dir().map(|d| d.join("station.json"))
}

/// Returns the path to the daemon's unix socket.
pub fn socket_path() -> Option<PathBuf> {
    data_dir().map(|d| d.join("daemon.sock"))
}

/// Parses a schedule configuration from JSON. `origin` names the source in
/// the error, a file path or a marker like "bundled default".
pub fn schedule_config_from_json(json: &str, origin: &str) -> Result<ScheduleConfig> {
    serde_json::from_str(json).map_err(|e| PassError::ConfigMalformed {
        path: PathBuf::from(origin),
        details: e.to_string(),
    })
}

/// Loads a schedule configuration file.
///
/// Unlike the state store, a broken schedule file is a hard error: serving
/// scans against an empty period table would reject every student, so the
/// caller should fall back to its bundled default instead.
pub fn load_schedule_config(path: &std::path::Path) -> Result<ScheduleConfig> {
    let contents = fs_err::read_to_string(path).map_err(|e| PassError::ConfigMalformed {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?;
    schedule_config_from_json(&contents, &path.display().to_string())
}
