//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `connectord.toml` in the working directory. Every field has a
//! default so the file is optional. Environment variables take precedence
//! over file values.

use serde::Deserialize;

use devicehub_domain::id::ConnectorId;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connector: ConnectorConfig,
    pub queue: QueueConfig,
    pub bus: BusConfig,
    pub supervisor: SupervisorConfig,
    pub logging: LoggingConfig,
}

/// The connector this process serves.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Registry id of the connector. A fresh one is generated when absent.
    pub id: Option<ConnectorId>,
    #[serde(rename = "type")]
    pub connector_type: String,
    pub identifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of buffered work items.
    pub capacity: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-subscriber buffer of the in-process bus.
    pub capacity: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How many times a connector update may restart the service.
    pub max_restarts: u32,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Config {
    /// Load configuration from `connectord.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("connectord.toml")?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = var("CONNECTORD_CONNECTOR_ID") {
            let id = val.parse().map_err(|_| {
                ConfigError::Validation(format!("CONNECTORD_CONNECTOR_ID is not a valid id: {val}"))
            })?;
            self.connector.id = Some(id);
        }
        if let Some(val) = var("CONNECTORD_CONNECTOR_TYPE") {
            self.connector.connector_type = val;
        }
        if let Some(val) = var("CONNECTORD_QUEUE_CAPACITY") {
            self.queue.capacity = val.parse().map_err(|_| {
                ConfigError::Validation(format!("CONNECTORD_QUEUE_CAPACITY is not a number: {val}"))
            })?;
        }
        if let Some(val) = var("CONNECTORD_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.capacity == 0 {
            return Err(ConfigError::Validation(
                "queue capacity must be non-zero".to_string(),
            ));
        }
        if self.bus.capacity == 0 {
            return Err(ConfigError::Validation(
                "bus capacity must be non-zero".to_string(),
            ));
        }
        if self.connector.connector_type.trim().is_empty() {
            return Err(ConfigError::Validation(
                "connector type must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            id: None,
            connector_type: "virtual".to_string(),
            identifier: "virtual-connector".to_string(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: devicehub_app::queue::QUEUE_CAPACITY,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { max_restarts: 5 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "connectord=info,devicehub=info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.connector.id, None);
        assert_eq!(config.connector.connector_type, "virtual");
        assert_eq!(config.connector.identifier, "virtual-connector");
        assert_eq!(config.queue.capacity, 1000);
        assert_eq!(config.bus.capacity, 256);
        assert_eq!(config.supervisor.max_restarts, 5);
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.queue.capacity, 1000);
    }

    #[test]
    fn should_parse_full_toml() {
        let id = ConnectorId::new();
        let toml = format!(
            "
            [connector]
            id = '{id}'
            type = 'modbus'
            identifier = 'plant-floor'

            [queue]
            capacity = 50

            [bus]
            capacity = 16

            [supervisor]
            max_restarts = 0

            [logging]
            filter = 'debug'
        "
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.connector.id, Some(id));
        assert_eq!(config.connector.connector_type, "modbus");
        assert_eq!(config.connector.identifier, "plant-floor");
        assert_eq!(config.queue.capacity, 50);
        assert_eq!(config.bus.capacity, 16);
        assert_eq!(config.supervisor.max_restarts, 0);
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn should_parse_partial_toml_with_defaults() {
        let toml = "
            [queue]
            capacity = 10
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.queue.capacity, 10);
        assert_eq!(config.connector.connector_type, "virtual");
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.queue.capacity, 1000);
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }

    #[test]
    fn should_apply_env_overrides_over_file_values() {
        let id = ConnectorId::new();
        let raw_id = id.to_string();
        let mut config = Config::default();

        config
            .apply_overrides(vars(&[
                ("CONNECTORD_CONNECTOR_ID", raw_id.as_str()),
                ("CONNECTORD_CONNECTOR_TYPE", "shelly"),
                ("CONNECTORD_QUEUE_CAPACITY", "12"),
                ("CONNECTORD_LOG", "warn"),
            ]))
            .unwrap();

        assert_eq!(config.connector.id, Some(id));
        assert_eq!(config.connector.connector_type, "shelly");
        assert_eq!(config.queue.capacity, 12);
        assert_eq!(config.logging.filter, "warn");
    }

    #[test]
    fn should_prefer_rust_log_over_connectord_log() {
        let mut config = Config::default();

        config
            .apply_overrides(vars(&[("CONNECTORD_LOG", "warn"), ("RUST_LOG", "trace")]))
            .unwrap();

        assert_eq!(config.logging.filter, "trace");
    }

    #[test]
    fn should_reject_malformed_connector_id_override() {
        let mut config = Config::default();

        let result = config.apply_overrides(vars(&[("CONNECTORD_CONNECTOR_ID", "nope")]));

        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_reject_zero_queue_capacity() {
        let mut config = Config::default();
        config.queue.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_zero_bus_capacity() {
        let mut config = Config::default();
        config.bus.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_accept_defaults() {
        assert!(Config::default().validate().is_ok());
    }
}
