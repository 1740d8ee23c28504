//! Producer client for sending messages to one topic
//!
//! Records are enqueued on the broker client and acknowledged asynchronously:
//! a background task drains delivery reports for the producer's lifetime and
//! forwards them to the [`ProducerHandler`].

use crate::broker::{InFlight, ProducerClient, ProducerEvent};
use crate::error::KafkaClientError;
use crate::message::{Header, Message, ProduceRecord};
use crate::metrics::{ProducerMetrics, ProducerMetricsSnapshot};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// User callbacks of a producer
pub trait ProducerHandler: Send + Sync {
    /// A record was acknowledged by the broker
    fn delivered(&self, message: &Message);

    /// A record could not be delivered or the client hit a fatal error
    fn fatal(&self, producer: &ProducerHandle, error: KafkaClientError);
}

/// Cloneable view of a producer passed to its handler
#[derive(Clone)]
pub struct ProducerHandle {
    name: Arc<str>,
    topic: Arc<str>,
    failed: Arc<AtomicBool>,
    metrics: Arc<ProducerMetrics>,
}

impl ProducerHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether a fatal error was reported; new records are refused from then on
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> ProducerMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl fmt::Display for ProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Producer {}", self.name)
    }
}

impl fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("failed", &self.is_failed())
            .finish()
    }
}

/// High-level producer client for one topic
pub struct Producer {
    client: Arc<dyn ProducerClient>,
    handle: ProducerHandle,
    // records produced whose report has not reached the handler yet
    reports: Arc<InFlight>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Producer {
    /// Wrap `client` and start draining its delivery reports
    pub fn new(
        client: Arc<dyn ProducerClient>,
        topic: &str,
        handler: Arc<dyn ProducerHandler>,
    ) -> Self {
        info!("Creating producer for topic {}...", topic);

        let handle = ProducerHandle {
            name: Arc::from(client.name()),
            topic: Arc::from(topic),
            failed: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(ProducerMetrics::default()),
        };
        let reports = Arc::new(InFlight::default());

        let listener = tokio::spawn(listen(
            client.clone(),
            handler,
            handle.clone(),
            reports.clone(),
        ));

        let producer = Self {
            client,
            handle,
            reports,
            listener: Mutex::new(Some(listener)),
        };
        info!("Created {}", producer);
        producer
    }

    pub fn topic(&self) -> &str {
        self.handle.topic()
    }

    pub fn handle(&self) -> ProducerHandle {
        self.handle.clone()
    }

    pub fn metrics(&self) -> ProducerMetricsSnapshot {
        self.handle.metrics()
    }

    /// Start building a record for this producer's topic
    pub fn message_builder<V: Into<Bytes>>(&self, value: V) -> MessageBuilder<'_> {
        MessageBuilder::new(self, value.into())
    }

    /// Enqueue a record; errors only on immediate rejection
    pub fn produce(&self, record: ProduceRecord) -> Result<(), KafkaClientError> {
        if self.handle.is_failed() {
            return Err(KafkaClientError::producer(format!(
                "{} has failed and accepts no more records",
                self
            )));
        }

        debug!("Producing message to {}...", record.topic);
        let byte_count = record.key.as_ref().map_or(0, |k| k.len())
            + record.value.as_ref().map_or(0, |v| v.len());

        self.reports.increment();
        match self.client.produce(record) {
            Ok(()) => {
                self.handle.metrics.record_produced(byte_count as u64);
                Ok(())
            }
            Err(err) => {
                self.reports.decrement();
                self.handle.metrics.record_produce_error();
                Err(err)
            }
        }
    }

    /// Wait up to `timeout` for outstanding records, returns how many remain
    pub async fn flush(&self, timeout: Duration) -> usize {
        debug!("Flushing {}...", self);
        let started = Instant::now();

        let pending = self.client.flush(timeout).await;
        if pending > 0 {
            return pending;
        }

        self.reports
            .wait_drained(timeout.saturating_sub(started.elapsed()))
            .await
    }

    /// Flush repeatedly until nothing is outstanding
    pub async fn flush_all(&self, timeout: Duration) {
        while self.flush(timeout).await > 0 {}
    }

    /// Close the broker client and wait for the report drain to finish
    pub async fn close(&self) {
        info!("Closing {}...", self);
        self.client.close().await;

        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(err) = listener.await {
                error!("Delivery report listener of {} failed: {}", self, err);
            }
        }
    }
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.handle, f)
    }
}

async fn listen(
    client: Arc<dyn ProducerClient>,
    handler: Arc<dyn ProducerHandler>,
    handle: ProducerHandle,
    reports: Arc<InFlight>,
) {
    while let Some(event) = client.next_event().await {
        match event {
            ProducerEvent::Delivery(message) => {
                match &message.error {
                    Some(err) => {
                        handle.metrics.record_delivery_failure();
                        fatal(&handle, handler.as_ref(), KafkaClientError::Broker(err.clone()));
                    }
                    None => {
                        debug!("Delivery successful: {}", message);
                        handle.metrics.record_delivered();
                        handler.delivered(&message);
                    }
                }
                reports.decrement();
            }
            ProducerEvent::Error { error, fatal: true } => {
                handle.metrics.record_transport_error();
                fatal(&handle, handler.as_ref(), error);
            }
            ProducerEvent::Error { error, .. } => {
                handle.metrics.record_transport_error();
                warn!("Delivery failed: {}", error);
            }
        }
    }

    debug!("Delivery report listener of {} finished", handle);
}

fn fatal(handle: &ProducerHandle, handler: &dyn ProducerHandler, err: KafkaClientError) {
    error!("Delivery failed on {}: {}", handle, err);
    handle.failed.store(true, Ordering::Release);
    handler.fatal(handle, err);
}

/// Fluent builder for a record on the producer's topic
pub struct MessageBuilder<'a> {
    producer: &'a Producer,
    key: Option<Bytes>,
    value: Bytes,
    headers: Vec<Header>,
}

impl<'a> MessageBuilder<'a> {
    fn new(producer: &'a Producer, value: Bytes) -> Self {
        Self {
            producer,
            key: None,
            value,
            headers: Vec::new(),
        }
    }

    /// Append a header; repeated names are kept in order
    pub fn header<K: Into<String>, V: Into<Bytes>>(mut self, key: K, value: V) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    pub fn key<K: Into<Bytes>>(mut self, key: K) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn build(self) -> ProduceRecord {
        ProduceRecord {
            topic: self.producer.topic().to_string(),
            partition: None,
            key: self.key,
            value: Some(self.value),
            headers: self.headers,
        }
    }

    pub fn produce(self) -> Result<(), KafkaClientError> {
        let producer = self.producer;
        producer.produce(self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::ClientConfig;

    #[derive(Default)]
    struct Recorder {
        delivered: Mutex<Vec<Message>>,
        fatal: Mutex<Vec<KafkaClientError>>,
    }

    impl ProducerHandler for Recorder {
        fn delivered(&self, message: &Message) {
            self.delivered.lock().push(message.clone());
        }

        fn fatal(&self, _producer: &ProducerHandle, error: KafkaClientError) {
            self.fatal.lock().push(error);
        }
    }

    #[tokio::test]
    async fn test_message_builder_targets_producer_topic() {
        let broker = MemoryBroker::new();
        broker.create_topic("events", 1).unwrap();
        let client = broker.producer_session(&ClientConfig::new()).unwrap();
        let recorder = Arc::new(Recorder::default());
        let producer = Producer::new(client, "events", recorder.clone());

        let record = producer
            .message_builder("v")
            .key("k")
            .header("h", "1")
            .header("h", "2")
            .build();
        assert_eq!(record.topic, "events");
        assert_eq!(record.partition, None);
        assert_eq!(record.headers.len(), 2);

        producer.message_builder("v").key("k").produce().unwrap();
        assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);

        let delivered = recorder.delivered.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].key_str(), Some("k"));
        producer.close().await;
    }

    #[tokio::test]
    async fn test_failed_producer_refuses_records() {
        let broker = MemoryBroker::new();
        let client = broker.producer_session(&ClientConfig::new()).unwrap();
        let recorder = Arc::new(Recorder::default());
        let producer = Producer::new(client, "missing", recorder.clone());

        producer.message_builder("v").produce().unwrap();
        assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);

        assert_eq!(recorder.fatal.lock().len(), 1);
        assert!(producer.handle().is_failed());
        assert!(producer.message_builder("v").produce().is_err());
        assert_eq!(producer.metrics().delivery_failures, 1);
        producer.close().await;
    }
}
