mod common;

use common::*;
use kafka_client::{
    DeliveryStrategy, KafkaClient, KafkaClientError, MemoryBroker, Message, ProducerHandle,
    ProducerHandler, TopicPartition, GROUP_ID, MAX_POLL_INTERVAL_MS,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "scenario";
const MESSAGE_COUNT: usize = 50;

#[derive(Default)]
struct DeliveryCounter {
    delivered: Mutex<Vec<Message>>,
    fatal: Mutex<Vec<KafkaClientError>>,
}

impl ProducerHandler for DeliveryCounter {
    fn delivered(&self, message: &Message) {
        self.delivered.lock().push(message.clone());
    }

    fn fatal(&self, _producer: &ProducerHandle, error: KafkaClientError) {
        self.fatal.lock().push(error);
    }
}

async fn run_scenario(slow_key: Option<&str>) {
    init_tracing();
    let broker = MemoryBroker::new();
    let client = KafkaClient::new("memory:9092", Arc::new(broker.clone()));

    let admin = client.new_admin(Duration::from_secs(5)).unwrap();
    admin
        .topic_builder(TOPIC)
        .with_partitions(2)
        .with_replication(1)
        .create()
        .await
        .unwrap();

    let deliveries = Arc::new(DeliveryCounter::default());
    let producer = client.new_producer(TOPIC, deliveries.clone()).unwrap();
    for i in 0..MESSAGE_COUNT {
        producer
            .message_builder(TOPIC)
            .key(i.to_string())
            .header("key", TOPIC)
            .produce()
            .unwrap();
    }
    producer.flush_all(Duration::from_secs(1)).await;
    producer.close().await;

    assert_eq!(deliveries.delivered.lock().len(), MESSAGE_COUNT);
    assert!(deliveries.fatal.lock().is_empty());

    let consumer_client = client.configure(|config| {
        config.set(GROUP_ID, "scenario-group");
        config.set(MAX_POLL_INTERVAL_MS, "200");
    });
    let recorder = Arc::new(Recorder {
        stop_after: Some(MESSAGE_COUNT),
        slow_keys: slow_key
            .map(|key| HashMap::from([(key.to_string(), Duration::from_millis(300))]))
            .unwrap_or_default(),
        ..Recorder::default()
    });
    let consumer = consumer_client
        .new_consumer(TOPIC, recorder.clone(), DeliveryStrategy::AtLeastOnce)
        .unwrap();

    run_until_stopped(&consumer, Duration::from_secs(20)).await;

    let mut keys: Vec<usize> = recorder
        .keys()
        .iter()
        .map(|k| k.parse().unwrap())
        .collect();
    keys.sort_unstable();
    assert_eq!(keys, (0..MESSAGE_COUNT).collect::<Vec<_>>());

    for message in recorder.handled.lock().iter() {
        assert_eq!(message.header("key").map(|v| &v[..]), Some(TOPIC.as_bytes()));
        assert_eq!(message.value_str(), Some(TOPIC));
    }

    for partition in 0..2 {
        let tp = TopicPartition::new(TOPIC, partition);
        let expected: Vec<i64> = (0..broker.records(&tp).len() as i64).collect();
        assert!(!expected.is_empty());
        assert_eq!(recorder.offsets(&tp), expected);
        assert_eq!(
            broker.committed_offset("scenario-group", &tp),
            Some(expected.len() as i64)
        );
    }

    let metrics = consumer.metrics();
    let expected_pauses = if slow_key.is_some() { 1 } else { 0 };
    assert_eq!(metrics.pauses, expected_pauses);
    assert_eq!(metrics.resumes, expected_pauses);
    assert_eq!(metrics.messages_handled, MESSAGE_COUNT as u64);
    assert_eq!(recorder.fatal_count(), 0);

    admin.delete_topic(TOPIC).await.unwrap();
}

#[tokio::test]
async fn test_fifty_messages_on_two_partitions() {
    run_scenario(None).await;
}

#[tokio::test]
async fn test_fifty_messages_with_slow_midpoint() {
    run_scenario(Some("25")).await;
}
