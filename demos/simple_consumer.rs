//! Simple consumer example
//!
//! Reads `KAFKA_*` settings from the environment. Without the `rdkafka`
//! feature the consumer runs against an in-process broker seeded with a few
//! records; with it, against the configured cluster.
//!
//! ```text
//! KAFKA_GROUP_ID=demo KAFKA_TOPIC=demo-topic cargo run --example simple_consumer
//! ```

use async_trait::async_trait;
use kafka_client::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct PrintHandler {
    count: AtomicUsize,
}

#[async_trait]
impl ConsumerHandler for PrintHandler {
    async fn handle(&self, _consumer: &ConsumerHandle, message: &Message) -> anyhow::Result<()> {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        println!(
            "   📨 Message {}: {} key='{}' value='{}'",
            count,
            message,
            message.key_str().unwrap_or("<no key>"),
            message.value_str().unwrap_or("<binary>")
        );
        Ok(())
    }

    fn fatal(&self, consumer: &ConsumerHandle, error: KafkaClientError) {
        eprintln!("   ❌ {} failed: {}", consumer, error);
    }
}

#[cfg(feature = "rdkafka")]
async fn connector(_topic: &str) -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(RdKafkaConnector))
}

#[cfg(not(feature = "rdkafka"))]
async fn connector(topic: &str) -> Result<Arc<dyn Connector>> {
    let broker = MemoryBroker::new();
    broker.create_topic(topic, 2)?;

    let producer = broker.producer_session(&ClientConfig::new())?;
    for i in 0..10 {
        let record = ProduceRecord::with_key(topic, i.to_string(), format!("hello {}", i));
        producer.produce(record)?;
    }
    producer.flush(Duration::from_millis(10)).await;

    Ok(Arc::new(broker))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("📖 Kafka client - Simple Consumer Example");
    println!("=========================================");

    let mut settings = Settings::from_env()?;
    if settings.group_id.is_none() {
        settings.group_id = Some("demo-consumer-group".to_string());
    }
    let topic = settings.topic.clone().unwrap_or_else(|| "demo-topic".to_string());

    let client = KafkaClient::from_settings(&settings, connector(&topic).await?);
    println!("✅ {} ({})", client, client.library_version());
    println!("📖 Consuming from topic: {} ({})", topic, settings.delivery_strategy);

    let handler = Arc::new(PrintHandler {
        count: AtomicUsize::new(0),
    });
    let consumer = client.new_consumer(&topic, handler.clone(), settings.delivery_strategy)?;

    println!("⏳ Press Ctrl-C to stop");
    consumer.start(Duration::from_millis(100)).await;

    let metrics = consumer.metrics();
    println!(
        "\n📊 Handled {} messages, {} handler errors, {} pauses",
        metrics.messages_handled, metrics.handler_errors, metrics.pauses
    );
    println!("✅ Consumer closed");

    Ok(())
}
