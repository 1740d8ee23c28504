//! librdkafka backend
//!
//! Consumer and producer poll on blocking threads; rebalance callbacks and
//! delivery reports are queued by the client contexts and surfaced through
//! the same event interface as the in-process broker.
//!
//! A revoked partition's pipeline is drained after librdkafka has already
//! completed the rebalance. If a message of that partition is still being
//! handled, its offset store is rejected with a state error and the consumer
//! stops through its fatal path, as for any other failed store. Stores that
//! landed before the revoke are committed when the consumer closes.

use super::{
    AdminClient, BrokerEvent, ConsumerClient, Connector, NewTopic, PartitionResult,
    ProducerClient, ProducerEvent,
};
use crate::config::{ClientConfig, LogLevel};
use crate::error::{BrokerError, ErrorCode, KafkaClientError};
use crate::message::{Header, Message, ProduceRecord, TopicPartition};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rdkafka::admin::{
    AdminClient as RdAdminClient, AdminOptions, NewTopic as RdNewTopic, TopicReplication,
};
use rdkafka::client::{ClientContext, DefaultClientContext};
use rdkafka::config::{ClientConfig as RdClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{
    DeliveryResult, Header as RdHeader, Headers, Message as RdMessage, OwnedHeaders,
};
use rdkafka::producer::{BaseRecord, Producer, ProducerContext, ThreadedProducer};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::util::get_rdkafka_version;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connector creating librdkafka-backed clients
#[derive(Debug, Clone, Copy, Default)]
pub struct RdKafkaConnector;

impl Connector for RdKafkaConnector {
    fn consumer(&self, config: &ClientConfig) -> Result<Arc<dyn ConsumerClient>, KafkaClientError> {
        let consumer: BaseConsumer<RebalanceContext> = rd_config(config)?
            .create_with_context(RebalanceContext::default())
            .map_err(|e| KafkaClientError::creation("consumer", e.to_string()))?;

        Ok(Arc::new(RdConsumer {
            consumer: Arc::new(consumer),
        }))
    }

    fn producer(&self, config: &ClientConfig) -> Result<Arc<dyn ProducerClient>, KafkaClientError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let producer: ThreadedProducer<DeliveryContext> = rd_config(config)?
            .create_with_context(DeliveryContext { events: events_tx })
            .map_err(|e| KafkaClientError::creation("producer", e.to_string()))?;

        Ok(Arc::new(RdProducer {
            producer: Arc::new(producer),
            events: tokio::sync::Mutex::new(events_rx),
            closed: CancellationToken::new(),
        }))
    }

    fn admin(&self, config: &ClientConfig) -> Result<Arc<dyn AdminClient>, KafkaClientError> {
        let admin: RdAdminClient<DefaultClientContext> = rd_config(config)?
            .create()
            .map_err(|e| KafkaClientError::creation("admin", e.to_string()))?;

        Ok(Arc::new(RdAdmin { admin }))
    }

    fn version(&self) -> String {
        get_rdkafka_version().1
    }
}

fn rd_config(config: &ClientConfig) -> Result<RdClientConfig, KafkaClientError> {
    let mut rd = RdClientConfig::new();
    for (key, value) in config.iter() {
        rd.set(key, value);
    }
    rd.set_log_level(match config.log_level()? {
        LogLevel::Emergency => RDKafkaLogLevel::Emerg,
        LogLevel::Alert => RDKafkaLogLevel::Alert,
        LogLevel::Critical => RDKafkaLogLevel::Critical,
        LogLevel::Error => RDKafkaLogLevel::Error,
        LogLevel::Warning => RDKafkaLogLevel::Warning,
        LogLevel::Notice => RDKafkaLogLevel::Notice,
        LogLevel::Info => RDKafkaLogLevel::Info,
        LogLevel::Debug => RDKafkaLogLevel::Debug,
    });
    Ok(rd)
}

fn error_code(code: RDKafkaErrorCode) -> ErrorCode {
    match code {
        RDKafkaErrorCode::NoError => ErrorCode::None,
        RDKafkaErrorCode::OffsetOutOfRange => ErrorCode::OffsetOutOfRange,
        RDKafkaErrorCode::UnknownTopicOrPartition
        | RDKafkaErrorCode::UnknownTopic
        | RDKafkaErrorCode::UnknownPartition => ErrorCode::UnknownTopicOrPartition,
        RDKafkaErrorCode::LeaderNotAvailable => ErrorCode::LeaderNotAvailable,
        RDKafkaErrorCode::RequestTimedOut => ErrorCode::RequestTimedOut,
        RDKafkaErrorCode::CoordinatorNotAvailable => ErrorCode::CoordinatorNotAvailable,
        RDKafkaErrorCode::RebalanceInProgress => ErrorCode::RebalanceInProgress,
        RDKafkaErrorCode::TopicAlreadyExists => ErrorCode::TopicAlreadyExists,
        RDKafkaErrorCode::InvalidPartitions => ErrorCode::InvalidPartitions,
        RDKafkaErrorCode::InvalidReplicationFactor => ErrorCode::InvalidReplicationFactor,
        RDKafkaErrorCode::State => ErrorCode::State,
        RDKafkaErrorCode::QueueFull => ErrorCode::QueueFull,
        RDKafkaErrorCode::Fatal => ErrorCode::Fatal,
        RDKafkaErrorCode::BrokerTransportFailure | RDKafkaErrorCode::AllBrokersDown => {
            ErrorCode::Transport
        }
        _ => ErrorCode::Unknown,
    }
}

fn broker_error(err: &KafkaError) -> BrokerError {
    let code = err
        .rdkafka_error_code()
        .map(error_code)
        .unwrap_or(ErrorCode::Unknown);
    BrokerError::new(code, err.to_string())
}

fn convert(err: KafkaError) -> KafkaClientError {
    KafkaClientError::Broker(broker_error(&err))
}

fn owned_message<M: RdMessage>(m: &M) -> Message {
    let mut message = Message::new(m.topic(), m.partition(), m.offset());
    message.key = m.key().map(Bytes::copy_from_slice);
    message.value = m.payload().map(Bytes::copy_from_slice);
    message.timestamp = m.timestamp().to_millis();
    if let Some(headers) = m.headers() {
        for header in headers.iter() {
            let value = header.value.map(Bytes::copy_from_slice).unwrap_or_default();
            message.headers.push(Header::new(header.key, value));
        }
    }
    message
}

fn partition_list(partitions: &[TopicPartition]) -> TopicPartitionList {
    let mut list = TopicPartitionList::new();
    for tp in partitions {
        list.add_partition(&tp.topic, tp.partition);
    }
    list
}

fn topic_partitions(list: &TopicPartitionList) -> Vec<TopicPartition> {
    list.elements()
        .iter()
        .map(|e| TopicPartition::new(e.topic(), e.partition()))
        .collect()
}

#[derive(Default)]
struct RebalanceContext {
    events: Mutex<VecDeque<BrokerEvent>>,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(list) = rebalance {
            self.events
                .lock()
                .push_back(BrokerEvent::RevokedPartitions(topic_partitions(list)));
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(list) => self
                .events
                .lock()
                .push_back(BrokerEvent::AssignedPartitions(topic_partitions(list))),
            Rebalance::Error(err) => warn!("Rebalance failed: {}", err),
            Rebalance::Revoke(_) => {}
        }
    }
}

struct RdConsumer {
    consumer: Arc<BaseConsumer<RebalanceContext>>,
}

impl RdConsumer {
    fn pending_event(&self) -> Option<BrokerEvent> {
        self.consumer.context().events.lock().pop_front()
    }
}

#[async_trait]
impl ConsumerClient for RdConsumer {
    async fn poll(&self, timeout: Duration) -> Option<BrokerEvent> {
        if let Some(event) = self.pending_event() {
            return Some(event);
        }

        let consumer = self.consumer.clone();
        let polled = tokio::task::spawn_blocking(move || {
            consumer
                .poll(timeout)
                .map(|result| result.map(|m| owned_message(&m)))
        })
        .await;

        let event = match polled {
            Ok(None) => None,
            Ok(Some(Ok(message))) => Some(BrokerEvent::Message(message)),
            Ok(Some(Err(err))) => Some(BrokerEvent::Error(convert(err))),
            Err(err) => Some(BrokerEvent::Error(KafkaClientError::consumer(err.to_string()))),
        };

        // rebalances observed during this poll precede its message
        let mut events = self.consumer.context().events.lock();
        if events.is_empty() {
            return event;
        }
        events.extend(event);
        events.pop_front()
    }

    fn subscribe(&self, topic: &str) -> Result<(), KafkaClientError> {
        self.consumer.subscribe(&[topic]).map_err(convert)
    }

    fn pause(&self, partitions: &[TopicPartition]) -> Result<(), KafkaClientError> {
        self.consumer
            .pause(&partition_list(partitions))
            .map_err(convert)
    }

    fn resume(&self, partitions: &[TopicPartition]) -> Result<(), KafkaClientError> {
        self.consumer
            .resume(&partition_list(partitions))
            .map_err(convert)
    }

    async fn commit(&self) -> Result<(), KafkaClientError> {
        let consumer = self.consumer.clone();
        let result = tokio::task::spawn_blocking(move || {
            consumer.commit_consumer_state(CommitMode::Sync)
        })
        .await
        .map_err(|e| KafkaClientError::consumer(e.to_string()))?;

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.rdkafka_error_code() == Some(RDKafkaErrorCode::NoOffset) => {
                debug!("Nothing to commit");
                Ok(())
            }
            Err(err) => Err(convert(err)),
        }
    }

    fn store_offset(&self, message: &Message) -> Result<Vec<PartitionResult>, KafkaClientError> {
        let next = message.offset + 1;
        self.consumer
            .store_offset(&message.topic, message.partition, next)
            .map_err(convert)?;

        Ok(vec![PartitionResult {
            topic_partition: message.topic_partition(),
            offset: next,
            error: None,
        }])
    }

    async fn close(&self) {
        if let Err(err) = self.commit().await {
            warn!("Failed to commit stored offsets on close: {}", err);
        }
        self.consumer.unsubscribe();
        info!("Closed {}", self.name());
    }

    fn name(&self) -> String {
        self.consumer.client().name().to_string()
    }
}

struct DeliveryContext {
    events: mpsc::UnboundedSender<ProducerEvent>,
}

impl ClientContext for DeliveryContext {
    fn error(&self, error: KafkaError, reason: &str) {
        let fatal = error.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal);
        let error = KafkaClientError::broker(broker_error(&error).code, reason);
        let _ = self.events.send(ProducerEvent::Error { error, fatal });
    }
}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        let report = match result {
            Ok(m) => owned_message(m),
            Err((err, m)) => Message {
                error: Some(broker_error(err)),
                ..owned_message(m)
            },
        };
        let _ = self.events.send(ProducerEvent::Delivery(report));
    }
}

struct RdProducer {
    producer: Arc<ThreadedProducer<DeliveryContext>>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<ProducerEvent>>,
    closed: CancellationToken,
}

#[async_trait]
impl ProducerClient for RdProducer {
    fn produce(&self, record: ProduceRecord) -> Result<(), KafkaClientError> {
        if self.closed.is_cancelled() {
            return Err(KafkaClientError::producer("producer is closed"));
        }

        let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
        for header in &record.headers {
            headers = headers.insert(RdHeader {
                key: &header.key,
                value: Some(header.value.as_ref()),
            });
        }

        let mut base = BaseRecord::<[u8], [u8]>::to(&record.topic).headers(headers);
        if let Some(key) = &record.key {
            base = base.key(key.as_ref());
        }
        if let Some(value) = &record.value {
            base = base.payload(value.as_ref());
        }
        if let Some(partition) = record.partition {
            base = base.partition(partition);
        }

        self.producer.send(base).map_err(|(err, _)| convert(err))
    }

    async fn next_event(&self) -> Option<ProducerEvent> {
        let mut events = self.events.lock().await;
        tokio::select! {
            biased;
            event = events.recv() => event,
            _ = self.closed.cancelled() => None,
        }
    }

    async fn flush(&self, timeout: Duration) -> usize {
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || {
            if let Err(err) = producer.flush(timeout) {
                debug!("Flush did not complete: {}", err);
            }
            producer.in_flight_count()
        })
        .await;

        match flushed {
            Ok(count) => usize::try_from(count).unwrap_or(0),
            Err(err) => {
                warn!("Flush task failed: {}", err);
                usize::try_from(self.producer.in_flight_count()).unwrap_or(0)
            }
        }
    }

    async fn close(&self) {
        self.closed.cancel();
        info!("Closed {}", self.name());
    }

    fn name(&self) -> String {
        self.producer.client().name().to_string()
    }
}

struct RdAdmin {
    admin: RdAdminClient<DefaultClientContext>,
}

impl RdAdmin {
    fn options(timeout: Duration) -> AdminOptions {
        AdminOptions::new().operation_timeout(Some(timeout))
    }
}

fn check_topic_result(
    results: Vec<rdkafka::admin::TopicResult>,
) -> Result<(), KafkaClientError> {
    for result in results {
        if let Err((topic, code)) = result {
            return Err(KafkaClientError::broker(
                error_code(code),
                format!("topic '{}': {}", topic, code),
            ));
        }
    }
    Ok(())
}

#[async_trait]
impl AdminClient for RdAdmin {
    async fn create_topic(&self, topic: NewTopic, timeout: Duration) -> Result<(), KafkaClientError> {
        let mut new_topic = RdNewTopic::new(
            &topic.name,
            topic.partitions,
            TopicReplication::Fixed(topic.replication),
        );
        for (key, value) in &topic.config {
            new_topic = new_topic.set(key, value);
        }

        let results = self
            .admin
            .create_topics(&[new_topic], &Self::options(timeout))
            .await
            .map_err(convert)?;
        check_topic_result(results)
    }

    async fn delete_topic(&self, topic: &str, timeout: Duration) -> Result<(), KafkaClientError> {
        let results = self
            .admin
            .delete_topics(&[topic], &Self::options(timeout))
            .await
            .map_err(convert)?;
        check_topic_result(results)
    }

    fn name(&self) -> String {
        self.admin.inner().name().to_string()
    }
}
