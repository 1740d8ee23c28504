//! Typed settings loaded from `KAFKA_*` environment variables

use crate::config::{AutoOffsetReset, ClientConfig, ClientConfigBuilder, LogLevel};
use crate::consumer::DeliveryStrategy;
use crate::error::KafkaClientError;
use config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Client settings, e.g. `KAFKA_BOOTSTRAP_SERVERS=localhost:9092`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,
    pub group_id: Option<String>,
    pub topic: Option<String>,
    pub auto_offset_reset: Option<AutoOffsetReset>,
    pub allow_auto_create_topics: Option<bool>,
    pub max_poll_interval_ms: Option<u64>,
    pub session_timeout_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub log_level: Option<LogLevel>,
    #[serde(default)]
    pub delivery_strategy: DeliveryStrategy,
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self, KafkaClientError> {
        Self::load(Environment::with_prefix("KAFKA"))
    }

    /// Load settings from an explicit variable map instead of the environment
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, KafkaClientError> {
        Self::load(Environment::with_prefix("KAFKA").source(Some(vars)))
    }

    fn load(environment: Environment) -> Result<Self, KafkaClientError> {
        let settings = Config::builder()
            .add_source(environment.try_parsing(true))
            .build()
            .map_err(|e| KafkaClientError::invalid_config(e.to_string()))?;

        settings
            .try_deserialize::<Settings>()
            .map_err(|e| KafkaClientError::invalid_config(e.to_string()))
    }

    /// Client configuration described by these settings
    pub fn client_config(&self) -> ClientConfig {
        let mut builder =
            ClientConfigBuilder::from_config(ClientConfig::with_servers(&self.bootstrap_servers));

        if let Some(group_id) = &self.group_id {
            builder = builder.group_id(group_id);
        }
        if let Some(reset) = self.auto_offset_reset {
            builder = builder.auto_offset_reset(reset);
        }
        if let Some(allow) = self.allow_auto_create_topics {
            builder = builder.allow_auto_create_topics(allow);
        }
        if let Some(ms) = self.max_poll_interval_ms {
            builder = builder.max_poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.session_timeout_ms {
            builder = builder.session_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.heartbeat_interval_ms {
            builder = builder.heartbeat_interval(Duration::from_millis(ms));
        }
        if let Some(level) = self.log_level {
            builder = builder.log_level(level);
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GROUP_ID, MAX_POLL_INTERVAL_MS};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_settings_from_vars() {
        let settings = Settings::from_vars(vars(&[
            ("KAFKA_BOOTSTRAP_SERVERS", "broker1:9092,broker2:9092"),
            ("KAFKA_GROUP_ID", "billing"),
            ("KAFKA_AUTO_OFFSET_RESET", "latest"),
            ("KAFKA_MAX_POLL_INTERVAL_MS", "3000"),
            ("KAFKA_DELIVERY_STRATEGY", "at_most_once"),
        ]))
        .unwrap();

        assert_eq!(settings.bootstrap_servers, "broker1:9092,broker2:9092");
        assert_eq!(settings.auto_offset_reset, Some(AutoOffsetReset::Latest));
        assert_eq!(settings.delivery_strategy, DeliveryStrategy::AtMostOnce);

        let config = settings.client_config();
        assert_eq!(config.servers(), "broker1:9092,broker2:9092");
        assert_eq!(config.get(GROUP_ID), Some("billing"));
        assert_eq!(config.get(MAX_POLL_INTERVAL_MS), Some("3000"));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_vars(HashMap::new()).unwrap();

        assert_eq!(settings.bootstrap_servers, "localhost:9092");
        assert_eq!(settings.group_id, None);
        assert_eq!(settings.delivery_strategy, DeliveryStrategy::AtLeastOnce);
    }
}
