//! # Kafka Client Library
//!
//! A flow-controlled Kafka consumer, an asynchronous producer and a topic
//! admin on top of a pluggable broker client.
//!
//! ## Features
//!
//! - **Per-partition pipelines**: messages of one partition are handled in
//!   order, partitions in parallel
//! - **Delivery strategies**: at-least-once or at-most-once offset storing
//! - **Backpressure**: slow partitions are committed and paused instead of
//!   exceeding `max.poll.interval.ms`
//! - **Pluggable backends**: an in-process [`MemoryBroker`] and, with the
//!   `rdkafka` feature, librdkafka
//! - **Observability**: `tracing` logs and per-client metrics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kafka_client::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl ConsumerHandler for Printer {
//!     async fn handle(&self, _consumer: &ConsumerHandle, message: &Message) -> anyhow::Result<()> {
//!         println!("{}: {:?}", message, message.value_str());
//!         Ok(())
//!     }
//!
//!     fn fatal(&self, consumer: &ConsumerHandle, error: KafkaClientError) {
//!         eprintln!("{} failed: {}", consumer, error);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = KafkaClient::new("localhost:9092", Arc::new(MemoryBroker::new()))
//!         .configure(|config| {
//!             config.set(GROUP_ID, "printer");
//!         });
//!
//!     let consumer = client.new_consumer("my-topic", Arc::new(Printer), DeliveryStrategy::AtLeastOnce)?;
//!     consumer.start(Duration::from_millis(100)).await;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod broker;
pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod metrics;
pub mod producer;
pub mod settings;
pub mod signal;

pub use admin::*;
pub use broker::{
    AdminClient, BrokerEvent, ConsumerClient, Connector, MemoryBroker, MemoryConsumer,
    MemoryProducer, NewTopic, PartitionResult, ProducerClient, ProducerEvent,
};
#[cfg(feature = "rdkafka")]
pub use broker::librdkafka::RdKafkaConnector;
pub use client::*;
pub use config::*;
pub use consumer::*;
pub use error::*;
pub use message::*;
pub use producer::*;
pub use settings::Settings;

/// Client library result type
pub type Result<T> = std::result::Result<T, KafkaClientError>;

/// Client library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
