use crate::models::settings::Settings;
use log::debug;
use std::fs;
use std::path::Path;

/// Upper bound on the configuration file size.
const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

/// Loads gateway configuration from the file system.
///
/// The path comes from `TOLLGATE_CONFIG_PATH` (default `./config.json`).
/// The file must exist, resolve inside the working directory, and stay
/// under 1 MB; the parsed settings still need [`Settings::validate`] before
/// use.
///
/// # Errors
///
/// Returns an error when the file is missing, escapes the working
/// directory, exceeds the size cap, or contains invalid JSON.
pub fn load_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    let config_path =
        std::env::var("TOLLGATE_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());

    debug!("loading configuration from {}", config_path);

    let path = Path::new(&config_path);
    if !path.exists() {
        return Err(format!("config file '{}' does not exist", config_path).into());
    }

    let canonical = path
        .canonicalize()
        .map_err(|e| format!("cannot resolve config path '{}': {}", config_path, e))?;
    let current_dir = std::env::current_dir()?;
    if !canonical.starts_with(&current_dir) {
        return Err(format!("config path '{}' is outside the working directory", config_path).into());
    }

    let metadata = fs::metadata(&canonical)?;
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(format!(
            "config file too large: {} bytes (max {})",
            metadata.len(),
            MAX_CONFIG_SIZE
        )
        .into());
    }

    let contents = fs::read_to_string(&canonical)?;
    let settings: Settings =
        serde_json::from_str(&contents).map_err(|e| format!("invalid config JSON: {}", e))?;

    debug!(
        "loaded configuration with {} tiers",
        settings.rate_limits.tiers.len()
    );
    Ok(settings)
}
