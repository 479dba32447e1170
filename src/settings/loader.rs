//! Settings loading.
//!
//! Reads `~/.phonebridge/settings.toml` (or an explicit path) once at startup.
//! A missing file yields defaults; a malformed file is an error rather than a
//! silent fallback, so operators notice typos.

use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};
use crate::settings::schema::BridgeSettings;

/// Get the path to the global settings file.
pub fn settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".phonebridge")
        .join("settings.toml")
}

/// Load settings from `path`, or from the default location when `path` is
/// None. A nonexistent file returns `BridgeSettings::default()`.
pub fn load(path: Option<&Path>) -> Result<BridgeSettings> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(settings_path);

    if !path.exists() {
        tracing::debug!("settings file not found at {:?}, using defaults", path);
        return Ok(BridgeSettings::default());
    }

    let contents = std::fs::read_to_string(&path)?;
    let settings: BridgeSettings = toml::from_str(&contents)
        .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;

    tracing::info!("loaded settings from {:?}", path);
    Ok(settings)
}
