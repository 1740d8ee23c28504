mod common;

use common::init_tracing;
use kafka_client::{
    BrokerError, ClientConfig, ErrorCode, KafkaClientError, MemoryBroker, Message, Producer,
    ProducerHandle, ProducerHandler, TopicPartition, QUEUE_BUFFERING_MAX_MESSAGES,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "events";

#[derive(Default)]
struct Reports {
    delivered: Mutex<Vec<Message>>,
    fatal: Mutex<Vec<KafkaClientError>>,
}

impl ProducerHandler for Reports {
    fn delivered(&self, message: &Message) {
        self.delivered.lock().push(message.clone());
    }

    fn fatal(&self, _producer: &ProducerHandle, error: KafkaClientError) {
        self.fatal.lock().push(error);
    }
}

fn setup(config: &ClientConfig) -> (MemoryBroker, Arc<kafka_client::MemoryProducer>, Producer, Arc<Reports>) {
    init_tracing();
    let broker = MemoryBroker::new();
    broker.create_topic(TOPIC, 3).unwrap();
    let session = broker.producer_session(config).unwrap();
    let reports = Arc::new(Reports::default());
    let producer = Producer::new(session.clone(), TOPIC, reports.clone());
    (broker, session, producer, reports)
}

#[tokio::test]
async fn test_delivery_reports_reach_handler() {
    let (broker, _session, producer, reports) = setup(&ClientConfig::new());

    for i in 0..30 {
        producer
            .message_builder(format!("value-{}", i))
            .key(format!("customer-{}", i % 5))
            .header("source", "test")
            .produce()
            .unwrap();
    }
    producer.flush_all(Duration::from_millis(100)).await;

    let delivered = reports.delivered.lock().clone();
    assert_eq!(delivered.len(), 30);
    assert!(delivered.iter().all(|m| m.error.is_none() && m.offset >= 0));
    assert!(delivered.iter().all(|m| m.header("source").is_some()));

    // same key, same partition
    for message in &delivered {
        let same_key = delivered.iter().filter(|m| m.key == message.key);
        assert!(same_key.into_iter().all(|m| m.partition == message.partition));
    }

    let total: usize = (0..3)
        .map(|p| broker.records(&TopicPartition::new(TOPIC, p)).len())
        .sum();
    assert_eq!(total, 30);

    let metrics = producer.metrics();
    assert_eq!(metrics.records_produced, 30);
    assert_eq!(metrics.records_delivered, 30);
    assert_eq!(metrics.outstanding(), 0);
    producer.close().await;
}

#[tokio::test]
async fn test_delivery_failure_is_fatal_and_refuses_new_records() {
    let (broker, _session, producer, reports) = setup(&ClientConfig::new());
    broker.fail_next_delivery(BrokerError::new(ErrorCode::RequestTimedOut, "no ack"));

    producer.message_builder("lost").produce().unwrap();
    assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);

    let fatal = reports.fatal.lock();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].code(), Some(ErrorCode::RequestTimedOut));
    assert!(producer.handle().is_failed());
    assert!(producer.message_builder("next").produce().is_err());
    assert!(reports.delivered.lock().is_empty());
}

#[tokio::test]
async fn test_transport_errors() {
    let (_broker, session, producer, reports) = setup(&ClientConfig::new());

    session.inject_error(KafkaClientError::broker(ErrorCode::Transport, "broker down"), false);
    producer.message_builder("v").produce().unwrap();
    assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);
    assert!(reports.fatal.lock().is_empty());
    assert_eq!(reports.delivered.lock().len(), 1);

    session.inject_error(KafkaClientError::broker(ErrorCode::Fatal, "fenced"), true);
    tokio::time::timeout(Duration::from_secs(1), async {
        while reports.fatal.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(producer.metrics().transport_errors, 2);
    producer.close().await;
}

#[tokio::test]
async fn test_full_queue_rejects_immediately() {
    let mut config = ClientConfig::new();
    config.set(QUEUE_BUFFERING_MAX_MESSAGES, "2");
    let (_broker, _session, producer, reports) = setup(&config);

    producer.message_builder("a").produce().unwrap();
    producer.message_builder("b").produce().unwrap();
    let err = producer.message_builder("c").produce().unwrap_err();
    assert!(matches!(err, KafkaClientError::QueueFull { capacity: 2 }));
    assert_eq!(producer.metrics().produce_errors, 1);

    producer.flush_all(Duration::from_millis(100)).await;
    assert_eq!(reports.delivered.lock().len(), 2);
    producer.message_builder("c").produce().unwrap();
    producer.flush_all(Duration::from_millis(100)).await;
    assert_eq!(reports.delivered.lock().len(), 3);
    producer.close().await;
}

#[tokio::test]
async fn test_close_rejects_new_records() {
    let (_broker, _session, producer, _reports) = setup(&ClientConfig::new());

    producer.close().await;
    assert!(producer.message_builder("late").produce().is_err());
}
