pub mod app_config;
pub mod config;
pub mod error;

pub use app_config::{AppConfig, Topics};
pub use config::{load_app_config, load_app_config_from_env};
pub use error::ConfigError;

/// Service name used as the default MQTT client id and in the startup banner.
pub const SERVICE_NAME: &str = "maschinengeist-services-safety-health-eps";
