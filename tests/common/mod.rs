#![allow(dead_code)]

use async_trait::async_trait;
use kafka_client::{
    AutoOffsetReset, ClientConfig, ClientConfigBuilder, Consumer, ConsumerHandle,
    ConsumerHandler, DeliveryStrategy, KafkaClientError, MemoryBroker, MemoryConsumer, Message,
    Offset, ProduceRecord, ProducerClient, ProducerEvent, TopicPartition,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn consumer_config(group: &str, max_poll_interval: Duration) -> ClientConfig {
    ClientConfigBuilder::from_config(ClientConfig::with_servers("memory:9092"))
        .group_id(group)
        .auto_offset_reset(AutoOffsetReset::Earliest)
        .enable_auto_offset_store(false)
        .max_poll_interval(max_poll_interval)
        .build()
}

/// Append keyed records straight into the broker, waiting for their reports
pub async fn produce(broker: &MemoryBroker, topic: &str, keys: impl IntoIterator<Item = String>) {
    let producer = broker.producer_session(&ClientConfig::new()).unwrap();
    let mut count = 0;
    for key in keys {
        producer
            .produce(ProduceRecord::with_key(topic, key.clone(), format!("value-{}", key)))
            .unwrap();
        count += 1;
    }
    for _ in 0..count {
        match producer.next_event().await {
            Some(ProducerEvent::Delivery(m)) => assert!(m.error.is_none(), "{}", m),
            other => panic!("unexpected producer event {:?}", other),
        }
    }
}

pub fn keys(range: std::ops::Range<u32>) -> impl Iterator<Item = String> {
    range.map(|i| i.to_string())
}

/// Handler recording every message it sees
#[derive(Default)]
pub struct Recorder {
    pub handled: Mutex<Vec<Message>>,
    pub fatal: Mutex<Vec<KafkaClientError>>,
    /// Stop the consumer once this many messages were handled
    pub stop_after: Option<usize>,
    /// Keys whose handling returns an error
    pub fail_keys: Vec<String>,
    /// Keys whose handling sleeps first
    pub slow_keys: HashMap<String, Duration>,
    /// Session whose store log is checked while handling
    pub session: Option<Arc<MemoryConsumer>>,
    pub stored_before_handle: Mutex<Vec<bool>>,
}

impl Recorder {
    pub fn stopping_after(count: usize) -> Self {
        Self {
            stop_after: Some(count),
            ..Self::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.handled
            .lock()
            .iter()
            .filter_map(|m| m.key_str().map(str::to_string))
            .collect()
    }

    pub fn offsets(&self, tp: &TopicPartition) -> Vec<Offset> {
        self.handled
            .lock()
            .iter()
            .filter(|m| m.topic_partition() == *tp)
            .map(|m| m.offset)
            .collect()
    }

    pub fn fatal_count(&self) -> usize {
        self.fatal.lock().len()
    }
}

#[async_trait]
impl ConsumerHandler for Recorder {
    async fn handle(&self, consumer: &ConsumerHandle, message: &Message) -> anyhow::Result<()> {
        if let Some(session) = &self.session {
            self.stored_before_handle
                .lock()
                .push(session.is_stored(message));
        }

        let key = message.key_str().unwrap_or_default().to_string();
        if let Some(delay) = self.slow_keys.get(&key) {
            tokio::time::sleep(*delay).await;
        }

        let handled = {
            let mut handled = self.handled.lock();
            handled.push(message.clone());
            handled.len()
        };
        if Some(handled) == self.stop_after {
            consumer.stop();
        }

        if self.fail_keys.contains(&key) {
            anyhow::bail!("refusing message with key {}", key);
        }
        Ok(())
    }

    fn fatal(&self, _consumer: &ConsumerHandle, error: KafkaClientError) {
        self.fatal.lock().push(error);
    }
}

/// Run `consumer` until it stops itself, failing the test after `limit`
pub async fn run_until_stopped(consumer: &Consumer, limit: Duration) {
    tokio::time::timeout(
        limit,
        consumer.start_with_shutdown(POLL_INTERVAL, std::future::pending()),
    )
    .await
    .expect("consumer did not stop in time");
}

/// Run `consumer` for a fixed time
pub async fn run_for(consumer: &Consumer, duration: Duration) {
    tokio::time::timeout(
        duration * 10,
        consumer.start_with_shutdown(POLL_INTERVAL, tokio::time::sleep(duration)),
    )
    .await
    .expect("consumer did not stop after shutdown");
}

pub fn new_consumer(
    session: Arc<MemoryConsumer>,
    config: &ClientConfig,
    topic: &str,
    handler: Arc<Recorder>,
    strategy: DeliveryStrategy,
) -> Consumer {
    Consumer::new(session, config, topic, handler, strategy).unwrap()
}
