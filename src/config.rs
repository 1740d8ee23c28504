//! Configuration types for the Kafka client
//!
//! Configuration is a flat key/value map using librdkafka property names, see
//! <https://github.com/confluentinc/librdkafka/blob/master/CONFIGURATION.md>.
//! [`ClientConfigBuilder`] offers typed setters for the options this crate
//! interprets itself; any other property is passed through to the backend.

use crate::error::KafkaClientError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const ALLOW_AUTO_CREATE_TOPICS: &str = "allow.auto.create.topics";
pub const AUTO_OFFSET_RESET: &str = "auto.offset.reset";
pub const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
pub const BROKER_ADDRESS_FAMILY: &str = "broker.address.family";
pub const ENABLE_AUTO_OFFSET_STORE: &str = "enable.auto.offset.store";
pub const GROUP_ID: &str = "group.id";
pub const HEARTBEAT_INTERVAL_MS: &str = "heartbeat.interval.ms";
pub const LOG_LEVEL: &str = "log_level";
pub const MAX_POLL_INTERVAL_MS: &str = "max.poll.interval.ms";
pub const QUEUE_BUFFERING_MAX_MESSAGES: &str = "queue.buffering.max.messages";
pub const SESSION_TIMEOUT_MS: &str = "session.timeout.ms";

/// librdkafka default for `max.poll.interval.ms`
pub const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 300_000;

/// Where a consumer group without a committed offset starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoOffsetReset {
    Earliest,
    Latest,
}

impl AutoOffsetReset {
    pub fn as_str(self) -> &'static str {
        match self {
            AutoOffsetReset::Earliest => "earliest",
            AutoOffsetReset::Latest => "latest",
        }
    }
}

impl FromStr for AutoOffsetReset {
    type Err = KafkaClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earliest" | "smallest" | "beginning" => Ok(AutoOffsetReset::Earliest),
            "latest" | "largest" | "end" => Ok(AutoOffsetReset::Latest),
            other => Err(KafkaClientError::invalid_config(format!(
                "{} must be earliest or latest, got '{}'",
                AUTO_OFFSET_RESET, other
            ))),
        }
    }
}

/// Syslog severity levels understood by librdkafka's `log_level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Closest `tracing` level for this severity
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Emergency | LogLevel::Alert | LogLevel::Critical | LogLevel::Error => {
                tracing::Level::ERROR
            }
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Notice | LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
        }
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = KafkaClientError;

    fn try_from(value: u8) -> Result<Self, KafkaClientError> {
        Ok(match value {
            0 => LogLevel::Emergency,
            1 => LogLevel::Alert,
            2 => LogLevel::Critical,
            3 => LogLevel::Error,
            4 => LogLevel::Warning,
            5 => LogLevel::Notice,
            6 => LogLevel::Info,
            7 => LogLevel::Debug,
            other => {
                return Err(KafkaClientError::invalid_config(format!(
                    "{} must be within 0..=7, got {}",
                    LOG_LEVEL, other
                )))
            }
        })
    }
}

/// Flat client configuration map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    entries: BTreeMap<String, String>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base configuration every client starts from
    pub fn with_servers<S: Into<String>>(servers: S) -> Self {
        let mut config = Self::new();
        config.set(BOOTSTRAP_SERVERS, servers);
        config.set(BROKER_ADDRESS_FAMILY, "v4");
        config.set(LOG_LEVEL, LogLevel::Warning.as_u8().to_string());
        config
    }

    /// Set a property, replacing any previous value
    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Return a copy with `key` set to `value` unless it is already present
    pub fn with_default<K: Into<String>, V: Into<String>>(&self, key: K, value: V) -> Self {
        let key = key.into();
        if self.contains(&key) {
            return self.clone();
        }

        let mut result = self.clone();
        result.entries.insert(key, value.into());
        result
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn servers(&self) -> &str {
        self.get(BOOTSTRAP_SERVERS).unwrap_or_default()
    }

    pub fn group_id(&self) -> Option<&str> {
        self.get(GROUP_ID)
    }

    /// Parse a property, falling back to `default` when it is absent
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, KafkaClientError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<T>().map_err(|e| {
                KafkaClientError::invalid_config(format!("{} = '{}': {}", key, raw, e))
            }),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, KafkaClientError> {
        self.parse_or(key, default)
    }

    /// Read a millisecond property as a duration
    pub fn duration_ms_or(&self, key: &str, default_ms: u64) -> Result<Duration, KafkaClientError> {
        self.parse_or(key, default_ms).map(Duration::from_millis)
    }

    pub fn auto_offset_reset(&self) -> Result<AutoOffsetReset, KafkaClientError> {
        self.parse_or(AUTO_OFFSET_RESET, AutoOffsetReset::Latest)
    }

    pub fn log_level(&self) -> Result<LogLevel, KafkaClientError> {
        LogLevel::try_from(self.parse_or(LOG_LEVEL, LogLevel::Warning.as_u8())?)
    }

    pub fn max_poll_interval(&self) -> Result<Duration, KafkaClientError> {
        self.duration_ms_or(MAX_POLL_INTERVAL_MS, DEFAULT_MAX_POLL_INTERVAL_MS)
    }
}

impl fmt::Display for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn servers<S: Into<String>>(mut self, servers: S) -> Self {
        self.config.set(BOOTSTRAP_SERVERS, servers);
        self
    }

    pub fn group_id<S: Into<String>>(mut self, group_id: S) -> Self {
        self.config.set(GROUP_ID, group_id);
        self
    }

    pub fn auto_offset_reset(mut self, reset: AutoOffsetReset) -> Self {
        self.config.set(AUTO_OFFSET_RESET, reset.as_str());
        self
    }

    pub fn allow_auto_create_topics(mut self, allow: bool) -> Self {
        self.config.set(ALLOW_AUTO_CREATE_TOPICS, allow.to_string());
        self
    }

    pub fn enable_auto_offset_store(mut self, enable: bool) -> Self {
        self.config.set(ENABLE_AUTO_OFFSET_STORE, enable.to_string());
        self
    }

    pub fn max_poll_interval(mut self, interval: Duration) -> Self {
        self.config
            .set(MAX_POLL_INTERVAL_MS, interval.as_millis().to_string());
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config
            .set(SESSION_TIMEOUT_MS, timeout.as_millis().to_string());
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config
            .set(HEARTBEAT_INTERVAL_MS, interval.as_millis().to_string());
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.set(LOG_LEVEL, level.as_u8().to_string());
        self
    }

    /// Set an arbitrary backend property
    pub fn set<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.config.set(key, value);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfigBuilder::from_config(ClientConfig::with_servers("broker1:9092"))
            .group_id("test-group")
            .auto_offset_reset(AutoOffsetReset::Earliest)
            .max_poll_interval(Duration::from_secs(3))
            .log_level(LogLevel::Debug)
            .build();

        assert_eq!(config.servers(), "broker1:9092");
        assert_eq!(config.group_id(), Some("test-group"));
        assert_eq!(config.get(BROKER_ADDRESS_FAMILY), Some("v4"));
        assert_eq!(config.auto_offset_reset().unwrap(), AutoOffsetReset::Earliest);
        assert_eq!(config.max_poll_interval().unwrap(), Duration::from_millis(3000));
        assert_eq!(config.log_level().unwrap(), LogLevel::Debug);
    }

    #[test]
    fn test_with_default_keeps_existing_value() {
        let mut config = ClientConfig::new();
        config.set(AUTO_OFFSET_RESET, "latest");

        let defaulted = config
            .with_default(AUTO_OFFSET_RESET, "earliest")
            .with_default(ENABLE_AUTO_OFFSET_STORE, "false");

        assert_eq!(defaulted.get(AUTO_OFFSET_RESET), Some("latest"));
        assert_eq!(defaulted.get(ENABLE_AUTO_OFFSET_STORE), Some("false"));
        assert!(!config.contains(ENABLE_AUTO_OFFSET_STORE));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = ClientConfig::new();
        config.set(MAX_POLL_INTERVAL_MS, "soon");
        config.set(LOG_LEVEL, "9");
        config.set(AUTO_OFFSET_RESET, "middle");

        assert!(matches!(
            config.max_poll_interval(),
            Err(KafkaClientError::InvalidConfig { .. })
        ));
        assert!(config.log_level().is_err());
        assert!(config.auto_offset_reset().is_err());
    }

    #[test]
    fn test_defaults_when_absent() {
        let config = ClientConfig::new();
        assert_eq!(
            config.max_poll_interval().unwrap(),
            Duration::from_millis(DEFAULT_MAX_POLL_INTERVAL_MS)
        );
        assert!(!config.bool_or(ALLOW_AUTO_CREATE_TOPICS, false).unwrap());
        assert_eq!(config.servers(), "");
    }

    #[test]
    fn test_log_level_maps_to_tracing() {
        assert_eq!(LogLevel::Warning.as_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Critical.as_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::try_from(6).unwrap(), LogLevel::Info);
    }
}
