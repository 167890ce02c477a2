use std::path::{Path, PathBuf};

use config::{Config, Environment, File};

use crate::settings::AppConfig;

/// Default file looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "clinvault.toml";

/// Loads the configuration: optional TOML file first, then
/// `CLINVAULT__SECTION__KEY` environment overrides, then validation.
///
/// A missing file is not an error; defaults apply.
pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
    let mut builder = Config::builder();
    let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
    if file.exists() {
        tracing::debug!(path = %file.display(), "loading configuration file");
        builder = builder.add_source(File::from(file));
    } else {
        tracing::debug!(path = %file.display(), "configuration file not found, using defaults");
    }
    // e.g. CLINVAULT__SEARCH__HARD_MAX_RESOURCES=500
    builder = builder.add_source(
        Environment::with_prefix("CLINVAULT")
            .try_parsing(true)
            .separator("__"),
    );
    let cfg = builder
        .build()
        .map_err(|e| format!("config build error: {e}"))?;
    let merged: AppConfig = cfg
        .try_deserialize()
        .map_err(|e| format!("config deserialize error: {e}"))?;
    merged.validate()?;
    Ok(merged)
}

pub fn load_config_from_path<P: AsRef<Path>>(path: Option<P>) -> Result<AppConfig, String> {
    let p = path
        .as_ref()
        .map(|p| p.as_ref().to_string_lossy().to_string());
    load_config(p.as_deref())
}
