mod common;

use common::init_tracing;
use kafka_client::{Admin, ErrorCode, KafkaClient, MemoryBroker, NewTopic};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn admin() -> (MemoryBroker, Admin) {
    init_tracing();
    let broker = MemoryBroker::new();
    let client = KafkaClient::new("memory:9092", Arc::new(broker.clone()));
    let admin = client.new_admin(Duration::from_secs(5)).unwrap();
    (broker, admin)
}

#[tokio::test]
async fn test_create_and_delete_topic() {
    let (broker, admin) = admin();

    admin
        .topic_builder("payments")
        .with_partitions(4)
        .with_replication(1)
        .with_config("cleanup.policy", "compact")
        .create()
        .await
        .unwrap();
    assert_eq!(broker.topics(), vec!["payments".to_string()]);

    admin.delete_topic("payments").await.unwrap();
    assert!(broker.topics().is_empty());

    // the name can be reused once deleted
    admin
        .topic_builder("payments")
        .with_partitions(1)
        .create()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_topic_errors_carry_broker_codes() {
    let (_broker, admin) = admin();

    admin
        .create_topic(NewTopic {
            name: "audit".to_string(),
            partitions: 2,
            replication: 1,
            config: BTreeMap::new(),
        })
        .await
        .unwrap();

    let exists = admin.topic_builder("audit").create().await.unwrap_err();
    assert_eq!(exists.code(), Some(ErrorCode::TopicAlreadyExists));

    let missing = admin.delete_topic("unknown").await.unwrap_err();
    assert_eq!(missing.code(), Some(ErrorCode::UnknownTopicOrPartition));

    let invalid = admin
        .topic_builder("empty")
        .with_partitions(0)
        .create()
        .await
        .unwrap_err();
    assert_eq!(invalid.code(), Some(ErrorCode::InvalidPartitions));

    let replication = admin
        .topic_builder("unreplicated")
        .with_replication(0)
        .create()
        .await
        .unwrap_err();
    assert_eq!(replication.code(), Some(ErrorCode::InvalidReplicationFactor));
}

#[tokio::test]
async fn test_admin_timeout_is_fixed_at_creation() {
    let (_broker, admin) = admin();
    assert_eq!(admin.timeout(), Duration::from_secs(5));
    assert!(admin.to_string().starts_with("Admin memory-admin"));
}
