//! Daemon runtime configuration.
//!
//! Timing knobs and the store location come from ~/.hallpass/config.toml;
//! a missing or unreadable file falls back to safe defaults so the daemon
//! always starts. Schedules come from ~/.hallpass/schedules.json, with a
//! bundled default table as the fallback.

use serde::Deserialize;
use std::path::PathBuf;
use tracing::{info, warn};

use hallpass_core::config::{runtime_config_path, schedules_path, state_path};
use hallpass_core::ScheduleConfig;

const DEFAULT_SCHEDULES: &str = include_str!("../schedules/default.json");

const DEFAULT_SCAN_DEBOUNCE_MS: u64 = 2_000;
const DEFAULT_STUDENT_COOLDOWN_MS: u64 = 5_000;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_scan_debounce_ms")]
    pub scan_debounce_ms: u64,
    #[serde(default = "default_student_cooldown_ms")]
    pub student_cooldown_ms: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scan_debounce_ms: DEFAULT_SCAN_DEBOUNCE_MS,
            student_cooldown_ms: DEFAULT_STUDENT_COOLDOWN_MS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            store_path: None,
        }
    }
}

impl RuntimeConfig {
    /// Resolves where attendance state persists: explicit override first,
    /// otherwise the standard location under the data directory.
    pub fn resolved_store_path(&self) -> Option<PathBuf> {
        self.store_path.clone().or_else(state_path)
    }
}

fn default_scan_debounce_ms() -> u64 {
    DEFAULT_SCAN_DEBOUNCE_MS
}

fn default_student_cooldown_ms() -> u64 {
    DEFAULT_STUDENT_COOLDOWN_MS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

pub fn load_runtime_config(path: Option<PathBuf>) -> Result<RuntimeConfig, String> {
    let config_path = match path.or_else(runtime_config_path) {
        Some(path) => path,
        None => return Err("Home directory not found".to_string()),
    };

    if !config_path.exists() {
        return Ok(RuntimeConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| {
        format!(
            "Failed to read runtime config {}: {}",
            config_path.display(),
            err
        )
    })?;
    toml::from_str::<RuntimeConfig>(&content).map_err(|err| {
        format!(
            "Failed to parse runtime config {}: {}",
            config_path.display(),
            err
        )
    })
}

/// Loads the schedule table, preferring the user's file over the bundled
/// default. A user file that fails to parse is logged and ignored rather
/// than taking the daemon down.
pub fn load_schedules(path: Option<PathBuf>) -> ScheduleConfig {
    let user_path = path.or_else(schedules_path);
    if let Some(path) = user_path {
        if path.exists() {
            match hallpass_core::config::load_schedule_config(&path) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded schedule configuration");
                    return config;
                }
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "Ignoring unreadable schedule file; using bundled default");
                }
            }
        }
    }

    match hallpass_core::config::schedule_config_from_json(DEFAULT_SCHEDULES, "bundled default") {
        Ok(config) => config,
        Err(err) => {
            // The bundled table is checked in with the binary; if it fails
            // to parse the build is broken, so serve an empty table.
            warn!(error = %err, "Bundled schedule table failed to parse");
            ScheduleConfig::default()
        }
    }
}
