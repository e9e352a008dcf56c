//! Persisted station selection.
//!
//! A station picks its schedule once (usually at the start of the day) and
//! every subsequent scan reuses it, so the scanner loop never has to pass
//! schedule flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationSelection {
    pub schedule: String,
    pub start_type: String,
    #[serde(default)]
    pub station_name: Option<String>,
}

fn selection_path(override_path: Option<PathBuf>) -> Result<PathBuf, String> {
    override_path
        .or_else(hallpass_core::config::station_path)
        .ok_or_else(|| "Home directory not found".to_string())
}

pub fn save(selection: &StationSelection, path: Option<PathBuf>) -> Result<(), String> {
    let path = selection_path(path)?;
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)
            .map_err(|err| format!("Failed to create station directory: {}", err))?;
    }
    let content = serde_json::to_string_pretty(selection)
        .map_err(|err| format!("Failed to serialize station selection: {}", err))?;
    fs_err::write(&path, content).map_err(|err| format!("Failed to write station file: {}", err))
}

/// Loads the saved selection; None when the station has never selected.
pub fn load(path: Option<PathBuf>) -> Result<Option<StationSelection>, String> {
    let path = selection_path(path)?;
    if !path.exists() {
        return Ok(None);
    }
    let content = fs_err::read_to_string(&path)
        .map_err(|err| format!("Failed to read station file: {}", err))?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|err| format!("Station file is malformed: {}", err))
}
