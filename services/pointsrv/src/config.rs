//! Service configuration
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`POINTSRV_`, `__` separates nesting levels,
//!    e.g. `POINTSRV_MQTT__HOST`)
//! 2. YAML config file
//! 3. Default values

use crate::publish::{InstallationConfig, MqttConfig};
use crate::sync::{SyncConfig, DEFAULT_GATEWAY_URL};
use errors::{PointError, PointResult};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/pointsrv.yaml";
pub const ENV_PREFIX: &str = "POINTSRV_";
pub const CONFIG_PATH_ENV: &str = "POINTSRV_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/pointsrv.db".to_string(),
        }
    }
}

/// Enabled driver variants; one scheduler runs per enabled variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriversConfig {
    pub modbus_rtu: bool,
    pub modbus_tcp: bool,
}

impl Default for DriversConfig {
    fn default() -> Self {
        Self {
            modbus_rtu: true,
            modbus_tcp: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            timeout_secs: 10,
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub workers: usize,
    pub queue_size: usize,
    pub sync_on_start: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let engine = SyncConfig::default();
        Self {
            workers: engine.workers,
            queue_size: engine.queue_size,
            sync_on_start: true,
        }
    }
}

impl SyncSettings {
    pub fn engine(&self) -> SyncConfig {
        SyncConfig {
            workers: self.workers,
            queue_size: self.queue_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Option<String>,
    pub level: String,
    pub json: bool,
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: "info".to_string(),
            json: false,
            file: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub drivers: DriversConfig,
    pub mqtt: MqttConfig,
    pub gateway: GatewayConfig,
    pub sync: SyncSettings,
    pub installation: InstallationConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from `path` plus `POINTSRV_` environment overrides
    pub fn load(path: impl AsRef<Path>) -> PointResult<Self> {
        Self::load_with_env(path, ENV_PREFIX)
    }

    /// Load with a custom environment prefix
    pub fn load_with_env(path: impl AsRef<Path>, env_prefix: &str) -> PointResult<Self> {
        let config: AppConfig = Self::figment(path.as_ref(), env_prefix)
            .extract()
            .map_err(|e| PointError::config(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path, env_prefix: &str) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if path.exists() {
            figment = figment.merge(Yaml::file(path));
        } else {
            warn!("Config file {} not found, using defaults", path.display());
        }
        figment.merge(Env::prefixed(env_prefix).split("__"))
    }

    pub fn validate(&self) -> PointResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(PointError::invalid_config("database.url", "must not be empty"));
        }
        if self.sync.workers == 0 {
            return Err(PointError::invalid_config("sync.workers", "must be at least 1"));
        }
        if self.sync.queue_size == 0 {
            return Err(PointError::invalid_config("sync.queue_size", "must be at least 1"));
        }
        if self.mqtt.qos > 2 {
            return Err(PointError::invalid_config("mqtt.qos", "must be 0, 1 or 2"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.drivers.modbus_rtu);
        assert!(!config.drivers.modbus_tcp);
        assert_eq!(config.sync.workers, 4);
        assert_eq!(config.sync.queue_size, 256);
        assert_eq!(config.gateway.url, "http://0.0.0.0:1616");
    }

    #[test]
    fn test_yaml_then_env_layering() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "drivers:\n  modbus_tcp: true\nmqtt:\n  host: broker.local\n  qos: 2\nsync:\n  workers: 2"
        )
        .unwrap();

        std::env::set_var("PTSRV_LAYER_TEST_MQTT__HOST", "env-broker");
        let config = AppConfig::load_with_env(file.path(), "PTSRV_LAYER_TEST_").unwrap();
        std::env::remove_var("PTSRV_LAYER_TEST_MQTT__HOST");

        assert!(config.drivers.modbus_tcp);
        assert!(config.drivers.modbus_rtu);
        assert_eq!(config.mqtt.host, "env-broker");
        assert_eq!(config.mqtt.qos, 2);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.sync.workers, 2);
        assert_eq!(config.sync.queue_size, 256);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load_with_env("does/not/exist.yaml", "PTSRV_MISSING_TEST_").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = AppConfig::default();
        config.sync.workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.url = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(PointError::InvalidConfig { .. })
        ));
    }
}
