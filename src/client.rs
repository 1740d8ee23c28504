//! High-level client interface

use crate::admin::Admin;
use crate::broker::Connector;
use crate::config::{
    AutoOffsetReset, ClientConfig, ALLOW_AUTO_CREATE_TOPICS, AUTO_OFFSET_RESET,
    ENABLE_AUTO_OFFSET_STORE,
};
use crate::consumer::{Consumer, ConsumerHandler, DeliveryStrategy};
use crate::error::KafkaClientError;
use crate::producer::{Producer, ProducerHandler};
use crate::settings::Settings;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Entry point holding the shared configuration and the broker backend
#[derive(Clone)]
pub struct KafkaClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
}

impl KafkaClient {
    /// Client for `servers` with the default configuration
    pub fn new<S: Into<String>>(servers: S, connector: Arc<dyn Connector>) -> Self {
        let servers = servers.into();
        info!("Creating Kafka client @ {}...", servers);

        let client = Self::with_config(ClientConfig::with_servers(servers), connector);
        info!("Default config: {}", client.config);
        client
    }

    /// Client using `config` as is
    pub fn with_config(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let client = Self { config, connector };
        info!("Library version: {}", client.library_version());
        client
    }

    pub fn from_settings(settings: &Settings, connector: Arc<dyn Connector>) -> Self {
        Self::with_config(settings.client_config(), connector)
    }

    /// A new client with an amended copy of this client's configuration
    pub fn configure<F>(&self, configurer: F) -> Self
    where
        F: FnOnce(&mut ClientConfig),
    {
        let mut result = self.clone();
        configurer(&mut result.config);
        info!("Final config: {}", result.config);
        result
    }

    /// A new client with `key` set unless it is already configured
    pub fn with_default<K: Into<String>, V: Into<String>>(&self, key: K, value: V) -> Self {
        Self {
            config: self.config.with_default(key, value),
            connector: self.connector.clone(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn servers(&self) -> &str {
        self.config.servers()
    }

    pub fn library_version(&self) -> String {
        self.connector.version()
    }

    /// Configuration handed to consumers, with consumer defaults for unset keys
    pub fn consumer_config(&self) -> ClientConfig {
        self.config
            .with_default(ALLOW_AUTO_CREATE_TOPICS, "false")
            .with_default(AUTO_OFFSET_RESET, AutoOffsetReset::Earliest.as_str())
            .with_default(ENABLE_AUTO_OFFSET_STORE, "false")
    }

    pub fn new_consumer(
        &self,
        topic: &str,
        handler: Arc<dyn ConsumerHandler>,
        strategy: DeliveryStrategy,
    ) -> Result<Consumer, KafkaClientError> {
        let config = self.consumer_config();
        let client = self.connector.consumer(&config)?;
        Consumer::new(client, &config, topic, handler, strategy)
    }

    pub fn new_producer(
        &self,
        topic: &str,
        handler: Arc<dyn ProducerHandler>,
    ) -> Result<Producer, KafkaClientError> {
        let client = self.connector.producer(&self.config)?;
        Ok(Producer::new(client, topic, handler))
    }

    pub fn new_admin(&self, timeout: Duration) -> Result<Admin, KafkaClientError> {
        info!("Creating admin...");
        let client = self.connector.admin(&self.config)?;
        Ok(Admin::new(client, timeout))
    }
}

impl fmt::Display for KafkaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kafka client @ {}", self.servers())
    }
}

impl fmt::Debug for KafkaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaClient")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::{BROKER_ADDRESS_FAMILY, GROUP_ID, LOG_LEVEL};

    fn client() -> KafkaClient {
        KafkaClient::new("localhost:9092", Arc::new(MemoryBroker::new()))
    }

    #[test]
    fn test_defaults_and_display() {
        let client = client();

        assert_eq!(client.servers(), "localhost:9092");
        assert_eq!(client.config().get(BROKER_ADDRESS_FAMILY), Some("v4"));
        assert_eq!(client.config().get(LOG_LEVEL), Some("4"));
        assert_eq!(client.to_string(), "Kafka client @ localhost:9092");
        assert!(client.library_version().starts_with("memory-broker"));
    }

    #[test]
    fn test_configure_leaves_original_untouched() {
        let client = client();
        let configured = client.configure(|config| {
            config.set(GROUP_ID, "billing");
        });

        assert_eq!(configured.config().group_id(), Some("billing"));
        assert_eq!(client.config().group_id(), None);
    }

    #[test]
    fn test_consumer_defaults_do_not_override() {
        let client = client().configure(|config| {
            config.set(AUTO_OFFSET_RESET, "latest");
        });
        let config = client.consumer_config();

        assert_eq!(config.get(AUTO_OFFSET_RESET), Some("latest"));
        assert_eq!(config.get(ALLOW_AUTO_CREATE_TOPICS), Some("false"));
        assert_eq!(config.get(ENABLE_AUTO_OFFSET_STORE), Some("false"));
    }

    #[test]
    fn test_new_consumer_without_group_fails() {
        let client = client();
        let handler: Arc<dyn ConsumerHandler> = Arc::new(NoopHandler);

        let err = client
            .new_consumer("t", handler, DeliveryStrategy::AtLeastOnce)
            .err()
            .unwrap();
        assert!(matches!(err, KafkaClientError::Creation { .. }));
    }

    struct NoopHandler;

    #[async_trait::async_trait]
    impl ConsumerHandler for NoopHandler {
        async fn handle(
            &self,
            _consumer: &crate::consumer::ConsumerHandle,
            _message: &crate::message::Message,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        fn fatal(&self, _consumer: &crate::consumer::ConsumerHandle, _error: KafkaClientError) {}
    }
}
