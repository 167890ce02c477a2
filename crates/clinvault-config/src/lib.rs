//! Configuration and logging setup for Clinvault.

pub mod loader;
pub mod observability;
pub mod settings;

pub use loader::{DEFAULT_CONFIG_FILE, load_config, load_config_from_path};
pub use settings::{
    AccessSettings, AppConfig, AuditSettings, BundleSettings, LoggingConfig, SearchSettings,
};
