//! Record types exchanged with the broker client

use crate::error::BrokerError;
use bytes::Bytes;
use std::fmt;

pub type TopicName = String;
pub type PartitionId = i32;
pub type Offset = i64;

/// Message header; names may repeat and order is preserved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Bytes,
}

impl Header {
    pub fn new<K: Into<String>, V: Into<Bytes>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Topic partition identifier, the routing key of a partition pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: TopicName,
    pub partition: PartitionId,
}

impl TopicPartition {
    pub fn new<T: Into<TopicName>>(topic: T, partition: PartitionId) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// A record received from, or delivered to, the broker
///
/// Consumed messages carry their position; delivery reports carry the
/// position the broker assigned and, on failure, the delivery error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: TopicName,
    pub partition: PartitionId,
    pub offset: Offset,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<Header>,
    pub timestamp: Option<i64>,
    pub error: Option<BrokerError>,
}

impl Message {
    pub fn new<T: Into<TopicName>>(topic: T, partition: PartitionId, offset: Offset) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            value: None,
            headers: Vec::new(),
            timestamp: None,
            error: None,
        }
    }

    pub fn with_key<K: Into<Bytes>>(mut self, key: K) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value<V: Into<Bytes>>(mut self, value: V) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_header<K: Into<String>, V: Into<Bytes>>(mut self, key: K, value: V) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// First header with the given name
    pub fn header(&self, key: &str) -> Option<&Bytes> {
        self.headers.iter().find(|h| h.key == key).map(|h| &h.value)
    }

    pub fn key_str(&self) -> Option<&str> {
        self.key.as_deref().and_then(|k| std::str::from_utf8(k).ok())
    }

    pub fn value_str(&self) -> Option<&str> {
        self.value.as_deref().and_then(|v| std::str::from_utf8(v).ok())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)?;
        if let Some(err) = &self.error {
            write!(f, " ({})", err)?;
        }
        Ok(())
    }
}

/// High-level record for producing messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceRecord {
    pub topic: TopicName,
    pub partition: Option<PartitionId>, // None for broker-client assignment
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<Header>,
}

impl ProduceRecord {
    /// Create a simple record with topic and value
    pub fn new<T: Into<TopicName>, V: Into<Bytes>>(topic: T, value: V) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            value: Some(value.into()),
            headers: Vec::new(),
        }
    }

    /// Create a record with topic, key, and value
    pub fn with_key<T: Into<TopicName>, K: Into<Bytes>, V: Into<Bytes>>(
        topic: T,
        key: K,
        value: V,
    ) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(topic, value)
        }
    }

    /// The message view of this record once placed at `partition`/`offset`
    pub fn into_message(self, partition: PartitionId, offset: Offset) -> Message {
        Message {
            topic: self.topic,
            partition,
            offset,
            key: self.key,
            value: self.value,
            headers: self.headers,
            timestamp: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_message_accessors() {
        let message = Message::new("orders", 1, 42)
            .with_key("7")
            .with_value("payload")
            .with_header("trace", "a")
            .with_header("trace", "b");

        assert_eq!(message.topic_partition(), TopicPartition::new("orders", 1));
        assert_eq!(message.key_str(), Some("7"));
        assert_eq!(message.value_str(), Some("payload"));
        assert_eq!(message.header("trace"), Some(&Bytes::from("a")));
        assert_eq!(message.headers.len(), 2);
        assert_eq!(message.to_string(), "orders[1]@42");
    }

    #[test]
    fn test_record_into_message_keeps_payload() {
        let record = ProduceRecord::with_key("orders", "k", "v");
        let message = record.into_message(0, 9);

        assert_eq!(message.offset, 9);
        assert_eq!(message.key_str(), Some("k"));
        assert_eq!(message.value_str(), Some("v"));
        assert!(message.error.is_none());

        let failed = Message {
            error: Some(BrokerError::new(ErrorCode::RequestTimedOut, "slow")),
            ..message
        };
        assert!(failed.to_string().contains("RequestTimedOut"));
    }
}
