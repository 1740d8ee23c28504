//! Broker client seam
//!
//! The wire protocol, group membership and partition assignment live behind
//! these traits. The flow controller, producer and admin only ever talk to a
//! [`ConsumerClient`], [`ProducerClient`] or [`AdminClient`] obtained from a
//! [`Connector`].

pub mod memory;
#[cfg(feature = "rdkafka")]
pub mod librdkafka;

use crate::config::ClientConfig;
use crate::error::{BrokerError, KafkaClientError};
use crate::message::{Message, Offset, ProduceRecord, TopicPartition};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub use memory::{MemoryBroker, MemoryConsumer, MemoryProducer};

/// Event returned by [`ConsumerClient::poll`]
#[derive(Debug)]
pub enum BrokerEvent {
    Message(Message),
    Error(KafkaClientError),
    AssignedPartitions(Vec<TopicPartition>),
    RevokedPartitions(Vec<TopicPartition>),
}

/// Event drained from a [`ProducerClient`]
#[derive(Debug)]
pub enum ProducerEvent {
    /// Delivery report; `message.error` is set when delivery failed
    Delivery(Message),
    /// Transport-level error not tied to one message
    Error {
        error: KafkaClientError,
        fatal: bool,
    },
}

/// Outcome of an offset store for one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionResult {
    pub topic_partition: TopicPartition,
    pub offset: Offset,
    pub error: Option<BrokerError>,
}

/// Topic to create, with its partition layout and config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopic {
    pub name: String,
    pub partitions: i32,
    pub replication: i32,
    pub config: BTreeMap<String, String>,
}

/// Consumer side of the broker client
#[async_trait]
pub trait ConsumerClient: Send + Sync {
    /// Wait up to `timeout` for the next event
    async fn poll(&self, timeout: Duration) -> Option<BrokerEvent>;

    fn subscribe(&self, topic: &str) -> Result<(), KafkaClientError>;

    fn pause(&self, partitions: &[TopicPartition]) -> Result<(), KafkaClientError>;

    fn resume(&self, partitions: &[TopicPartition]) -> Result<(), KafkaClientError>;

    /// Commit every offset stored so far
    async fn commit(&self) -> Result<(), KafkaClientError>;

    /// Mark `message` as processed, eligible for the next commit
    fn store_offset(&self, message: &Message) -> Result<Vec<PartitionResult>, KafkaClientError>;

    async fn close(&self);

    fn name(&self) -> String;
}

/// Producer side of the broker client
#[async_trait]
pub trait ProducerClient: Send + Sync {
    /// Enqueue a record; fails only when the record is rejected immediately
    fn produce(&self, record: ProduceRecord) -> Result<(), KafkaClientError>;

    /// Next delivery report or error, `None` once the client is closed
    async fn next_event(&self) -> Option<ProducerEvent>;

    /// Wait up to `timeout` for outstanding records, returns how many remain
    async fn flush(&self, timeout: Duration) -> usize;

    async fn close(&self);

    fn name(&self) -> String;
}

/// Topic administration
#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn create_topic(&self, topic: NewTopic, timeout: Duration)
        -> Result<(), KafkaClientError>;

    async fn delete_topic(&self, topic: &str, timeout: Duration) -> Result<(), KafkaClientError>;

    fn name(&self) -> String;
}

/// Factory for broker clients of one backend
pub trait Connector: Send + Sync {
    fn consumer(&self, config: &ClientConfig) -> Result<Arc<dyn ConsumerClient>, KafkaClientError>;

    fn producer(&self, config: &ClientConfig) -> Result<Arc<dyn ProducerClient>, KafkaClientError>;

    fn admin(&self, config: &ClientConfig) -> Result<Arc<dyn AdminClient>, KafkaClientError>;

    /// Backend library version
    fn version(&self) -> String;
}

/// Turn a store result into an error if any partition failed
pub fn check_partition_results(results: &[PartitionResult]) -> Result<(), KafkaClientError> {
    match results.iter().find_map(|r| r.error.clone()) {
        Some(error) => Err(KafkaClientError::Broker(error)),
        None => Ok(()),
    }
}

/// Count of outstanding records with a wake-up when it reaches zero
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: AtomicUsize,
    drained: Notify,
}

impl InFlight {
    pub(crate) fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decrement(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Wait up to `timeout` for the count to reach zero, returns what remains
    pub(crate) async fn wait_drained(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let remaining = self.get();
            if remaining == 0 {
                return 0;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.get();
            }
        }
    }
}
