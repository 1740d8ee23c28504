//! Admin client for topic management

use crate::broker::{AdminClient, NewTopic};
use crate::error::KafkaClientError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DEFAULT_PARTITIONS: i32 = 24;
const DEFAULT_REPLICATION: i32 = 3;

/// Topic administration with a fixed operation timeout
pub struct Admin {
    client: Arc<dyn AdminClient>,
    timeout: Duration,
}

impl Admin {
    pub fn new(client: Arc<dyn AdminClient>, timeout: Duration) -> Self {
        info!("Created admin {} (operation timeout {:?})", client.name(), timeout);
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start describing a topic with 24 partitions and replication factor 3
    pub fn topic_builder<S: Into<String>>(&self, name: S) -> TopicBuilder<'_> {
        TopicBuilder::new(self, name.into())
    }

    /// Create a topic; the broker's per-topic error, if any, is returned as
    /// [`KafkaClientError::Broker`]
    pub async fn create_topic(&self, topic: NewTopic) -> Result<(), KafkaClientError> {
        info!("Creating topic {}...", topic.name);
        let name = topic.name.clone();
        self.client.create_topic(topic, self.timeout).await?;
        info!("Processed topic {}", name);
        Ok(())
    }

    pub async fn delete_topic(&self, topic: &str) -> Result<(), KafkaClientError> {
        info!("Deleting topic {}...", topic);
        self.client.delete_topic(topic, self.timeout).await?;
        info!("Processed topic {}", topic);
        Ok(())
    }
}

impl fmt::Display for Admin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Admin {}", self.client.name())
    }
}

/// Fluent builder for a [`NewTopic`]
pub struct TopicBuilder<'a> {
    admin: &'a Admin,
    name: String,
    partitions: i32,
    replication: i32,
    config: BTreeMap<String, String>,
}

impl<'a> TopicBuilder<'a> {
    fn new(admin: &'a Admin, name: String) -> Self {
        Self {
            admin,
            name,
            partitions: DEFAULT_PARTITIONS,
            replication: DEFAULT_REPLICATION,
            config: BTreeMap::new(),
        }
    }

    /// Set a per-topic config entry, e.g. `retention.ms`
    pub fn with_config<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_replication(mut self, replication: i32) -> Self {
        self.replication = replication;
        self
    }

    pub fn build(&self) -> NewTopic {
        NewTopic {
            name: self.name.clone(),
            partitions: self.partitions,
            replication: self.replication,
            config: self.config.clone(),
        }
    }

    pub async fn create(self) -> Result<(), KafkaClientError> {
        self.admin.create_topic(self.build()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Connector, MemoryBroker};
    use crate::config::ClientConfig;
    use crate::error::ErrorCode;

    fn admin(broker: &MemoryBroker) -> Admin {
        Admin::new(
            broker.admin(&ClientConfig::new()).unwrap(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_topic_builder_defaults() {
        let broker = MemoryBroker::new();
        let admin = admin(&broker);

        let topic = admin.topic_builder("orders").build();
        assert_eq!(topic.partitions, 24);
        assert_eq!(topic.replication, 3);
        assert!(topic.config.is_empty());

        let topic = admin
            .topic_builder("orders")
            .with_partitions(2)
            .with_replication(1)
            .with_config("retention.ms", "1000")
            .build();
        assert_eq!(topic.partitions, 2);
        assert_eq!(topic.config.get("retention.ms").map(String::as_str), Some("1000"));
    }

    #[tokio::test]
    async fn test_create_twice_reports_topic_already_exists() {
        let broker = MemoryBroker::new();
        let admin = admin(&broker);

        admin.topic_builder("orders").with_partitions(2).create().await.unwrap();
        let err = admin
            .topic_builder("orders")
            .with_partitions(2)
            .create()
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some(ErrorCode::TopicAlreadyExists));
        assert_eq!(broker.topics(), vec!["orders".to_string()]);
    }
}
