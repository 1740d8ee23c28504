//! Simple producer example
//!
//! Without the `rdkafka` feature records go to an in-process broker; with it,
//! to the cluster named by `KAFKA_BOOTSTRAP_SERVERS`.

use kafka_client::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct CountingHandler {
    delivered: AtomicUsize,
}

impl ProducerHandler for CountingHandler {
    fn delivered(&self, message: &Message) {
        let count = self.delivered.fetch_add(1, Ordering::Relaxed) + 1;
        println!("   ✅ Delivered {} ({})", message, count);
    }

    fn fatal(&self, producer: &ProducerHandle, error: KafkaClientError) {
        eprintln!("   ❌ {} failed: {}", producer, error);
    }
}

#[cfg(feature = "rdkafka")]
fn connector() -> Arc<dyn Connector> {
    Arc::new(RdKafkaConnector)
}

#[cfg(not(feature = "rdkafka"))]
fn connector() -> Arc<dyn Connector> {
    Arc::new(MemoryBroker::new().with_auto_create(3))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("🚀 Kafka client - Simple Producer Example");
    println!("=========================================");

    let settings = Settings::from_env()?;
    let topic = settings.topic.clone().unwrap_or_else(|| "demo-topic".to_string());
    let client = KafkaClient::from_settings(&settings, connector());
    println!("✅ {} ({})", client, client.library_version());

    let handler = Arc::new(CountingHandler::default());
    let producer = client.new_producer(&topic, handler.clone())?;

    println!("\n📤 Producing 10 keyed messages to {}", topic);
    for i in 0..10 {
        producer
            .message_builder(format!("Hello from message {}", i))
            .key(format!("user-{}", i % 3))
            .header("sequence", i.to_string())
            .produce()?;
    }

    producer.flush_all(Duration::from_secs(5)).await;
    producer.close().await;

    let metrics = producer.metrics();
    println!(
        "\n📊 Produced {} records ({} bytes), {} delivered, {} failed",
        metrics.records_produced,
        metrics.bytes_produced,
        metrics.records_delivered,
        metrics.delivery_failures
    );
    println!("🎉 Producer example completed");

    Ok(())
}
