use serde::{Deserialize, Serialize};

/// Bundle type labels accepted for `bundle.default_bundle_type`.
pub const BUNDLE_TYPES: [&str; 5] = ["collection", "transaction", "batch", "searchset", "history"];

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub bundle: BundleSettings,
    #[serde(default)]
    pub access: AccessSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub audit: AuditSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.search.default_max_resources == 0 {
            return Err("search.default_max_resources must be > 0".into());
        }
        if self.search.default_max_resources > self.search.hard_max_resources {
            return Err(
                "search.default_max_resources must be <= search.hard_max_resources".into(),
            );
        }

        if !BUNDLE_TYPES.contains(&self.bundle.default_bundle_type.as_str()) {
            return Err(format!(
                "bundle.default_bundle_type must be one of {BUNDLE_TYPES:?}"
            ));
        }
        if self.bundle.max_history_versions == 0 {
            return Err("bundle.max_history_versions must be > 0".into());
        }
        if self.bundle.history_key_cap == 0 {
            return Err("bundle.history_key_cap must be > 0".into());
        }
        if self.bundle.max_import_entries == 0 {
            return Err("bundle.max_import_entries must be > 0".into());
        }

        if self.access.max_emergency_duration_hours == 0 {
            return Err("access.max_emergency_duration_hours must be > 0".into());
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {LOG_LEVELS:?}"));
        }
        Ok(())
    }

    /// Renders the effective configuration, e.g. for a startup dump.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("config serialize error: {e}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchSettings {
    #[serde(default = "default_max_resources")]
    pub default_max_resources: usize,
    #[serde(default = "default_hard_max_resources")]
    pub hard_max_resources: usize,
}

fn default_max_resources() -> usize {
    1000
}
fn default_hard_max_resources() -> usize {
    10_000
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_max_resources: default_max_resources(),
            hard_max_resources: default_hard_max_resources(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleSettings {
    #[serde(default = "default_bundle_type")]
    pub default_bundle_type: String,
    #[serde(default = "default_max_history_versions")]
    pub max_history_versions: usize,
    /// Logical keys expanded into history per export.
    #[serde(default = "default_history_key_cap")]
    pub history_key_cap: usize,
    #[serde(default = "default_max_import_entries")]
    pub max_import_entries: usize,
}

fn default_bundle_type() -> String {
    "collection".into()
}
fn default_max_history_versions() -> usize {
    10
}
fn default_history_key_cap() -> usize {
    100
}
fn default_max_import_entries() -> usize {
    10_000
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            default_bundle_type: default_bundle_type(),
            max_history_versions: default_max_history_versions(),
            history_key_cap: default_history_key_cap(),
            max_import_entries: default_max_import_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessSettings {
    /// Expiry given to emergency grants that do not request one.
    #[serde(default = "default_emergency_hours")]
    pub max_emergency_duration_hours: u32,
}

fn default_emergency_hours() -> u32 {
    24
}

impl Default for AccessSettings {
    fn default() -> Self {
        Self {
            max_emergency_duration_hours: default_emergency_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.search.default_max_resources, 1000);
        assert_eq!(cfg.bundle.history_key_cap, 100);
        assert_eq!(cfg.access.max_emergency_duration_hours, 24);
        assert!(cfg.audit.enabled);
    }

    #[test]
    fn test_validation_errors() {
        let mut cfg = AppConfig::default();
        cfg.bundle.default_bundle_type = "document".into();
        assert!(cfg.validate().unwrap_err().contains("default_bundle_type"));

        let mut cfg = AppConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().unwrap_err().contains("logging.level"));

        let mut cfg = AppConfig::default();
        cfg.access.max_emergency_duration_hours = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_toml_dump_round_trips() {
        let cfg = AppConfig::default();
        let rendered = cfg.to_toml().unwrap();
        assert!(rendered.contains("[bundle]"));
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, cfg);
    }
}
