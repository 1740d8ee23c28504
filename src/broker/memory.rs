//! In-process broker
//!
//! A single-node broker kept entirely in memory: topic logs, consumer-group
//! committed offsets, per-session assignment, pause sets and delivery
//! reports. Every consumer session of a group is assigned all partitions of
//! its subscribed topic. One-shot fault injection (`fail_next_*`) and call
//! logs make the flow controller's error paths observable.

use super::{
    AdminClient, BrokerEvent, ConsumerClient, Connector, InFlight, NewTopic, PartitionResult,
    ProducerClient, ProducerEvent,
};
use crate::config::{
    AutoOffsetReset, ClientConfig, ALLOW_AUTO_CREATE_TOPICS, QUEUE_BUFFERING_MAX_MESSAGES,
};
use crate::error::{BrokerError, ErrorCode, KafkaClientError};
use crate::message::{Message, Offset, PartitionId, ProduceRecord, TopicPartition};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Default)]
struct TopicLog {
    partitions: Vec<Vec<Message>>,
}

#[derive(Debug, Default)]
struct Faults {
    store: Option<BrokerError>,
    store_partition: Option<BrokerError>,
    commit: Option<BrokerError>,
    pause: Option<BrokerError>,
    resume: Option<BrokerError>,
    delivery: Option<BrokerError>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    // group -> partition -> next offset to consume
    committed: HashMap<String, HashMap<TopicPartition, Offset>>,
    auto_create_partitions: Option<i32>,
    faults: Faults,
}

impl BrokerState {
    fn create_topic(&mut self, name: &str, partitions: i32) -> Result<(), KafkaClientError> {
        if partitions < 1 {
            return Err(KafkaClientError::broker(
                ErrorCode::InvalidPartitions,
                format!("topic '{}' needs at least one partition", name),
            ));
        }
        if self.topics.contains_key(name) {
            return Err(KafkaClientError::broker(
                ErrorCode::TopicAlreadyExists,
                format!("topic '{}' already exists", name),
            ));
        }

        self.topics.insert(
            name.to_string(),
            TopicLog {
                partitions: vec![Vec::new(); partitions as usize],
            },
        );
        info!("Created topic {} with {} partitions", name, partitions);
        Ok(())
    }

    fn ensure_topic(&mut self, name: &str, allow_auto_create: bool) -> bool {
        if self.topics.contains_key(name) {
            return true;
        }
        match self.auto_create_partitions {
            Some(partitions) if allow_auto_create => self.create_topic(name, partitions).is_ok(),
            _ => false,
        }
    }

    fn partition_count(&self, topic: &str) -> Option<usize> {
        self.topics.get(topic).map(|t| t.partitions.len())
    }

    fn log(&self, tp: &TopicPartition) -> Option<&Vec<Message>> {
        self.topics
            .get(&tp.topic)
            .and_then(|t| t.partitions.get(usize::try_from(tp.partition).ok()?))
    }
}

fn fault(slot: &mut Option<BrokerError>) -> Result<(), KafkaClientError> {
    match slot.take() {
        Some(error) => Err(KafkaClientError::Broker(error)),
        None => Ok(()),
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// In-memory broker shared by every client created from it
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let producers and consumers create missing topics with `partitions` partitions
    pub fn with_auto_create(self, partitions: i32) -> Self {
        self.state.lock().auto_create_partitions = Some(partitions);
        self
    }

    pub fn create_topic(&self, name: &str, partitions: i32) -> Result<(), KafkaClientError> {
        self.state.lock().create_topic(name, partitions)?;
        self.notify.notify_waiters();
        Ok(())
    }

    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().topics.keys().cloned().collect();
        names.sort();
        names
    }

    /// Records currently in the log of one partition
    pub fn records(&self, tp: &TopicPartition) -> Vec<Message> {
        self.state.lock().log(tp).cloned().unwrap_or_default()
    }

    /// Next offset the group will consume from `tp`, if it has committed one
    pub fn committed_offset(&self, group_id: &str, tp: &TopicPartition) -> Option<Offset> {
        self.state
            .lock()
            .committed
            .get(group_id)
            .and_then(|offsets| offsets.get(tp).copied())
    }

    /// Fail the next offset store with an RPC error
    pub fn fail_next_store(&self, error: BrokerError) {
        self.state.lock().faults.store = Some(error);
    }

    /// Fail the next offset store through its per-partition result
    pub fn fail_next_store_partition(&self, error: BrokerError) {
        self.state.lock().faults.store_partition = Some(error);
    }

    pub fn fail_next_commit(&self, error: BrokerError) {
        self.state.lock().faults.commit = Some(error);
    }

    pub fn fail_next_pause(&self, error: BrokerError) {
        self.state.lock().faults.pause = Some(error);
    }

    pub fn fail_next_resume(&self, error: BrokerError) {
        self.state.lock().faults.resume = Some(error);
    }

    /// Fail delivery of the next produced record
    pub fn fail_next_delivery(&self, error: BrokerError) {
        self.state.lock().faults.delivery = Some(error);
    }

    /// Open a consumer session; `group.id` is required
    pub fn consumer_session(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<MemoryConsumer>, KafkaClientError> {
        let group_id = config
            .group_id()
            .filter(|g| !g.is_empty())
            .ok_or_else(|| KafkaClientError::creation("consumer", "group.id must be set"))?
            .to_string();

        Ok(Arc::new(MemoryConsumer {
            broker: self.clone(),
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            group_id,
            auto_offset_reset: config.auto_offset_reset()?,
            allow_auto_create: config.bool_or(ALLOW_AUTO_CREATE_TOPICS, false)?,
            session: Mutex::new(Session::default()),
            calls: Mutex::new(CallLog::default()),
        }))
    }

    pub fn producer_session(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<MemoryProducer>, KafkaClientError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(MemoryProducer {
            broker: self.clone(),
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            capacity: config.parse_or(QUEUE_BUFFERING_MAX_MESSAGES, DEFAULT_QUEUE_CAPACITY)?,
            in_flight: Arc::new(InFlight::default()),
            round_robin: AtomicUsize::new(0),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            closed: CancellationToken::new(),
        }))
    }
}

impl Connector for MemoryBroker {
    fn consumer(&self, config: &ClientConfig) -> Result<Arc<dyn ConsumerClient>, KafkaClientError> {
        Ok(self.consumer_session(config)?)
    }

    fn producer(&self, config: &ClientConfig) -> Result<Arc<dyn ProducerClient>, KafkaClientError> {
        Ok(self.producer_session(config)?)
    }

    fn admin(&self, _config: &ClientConfig) -> Result<Arc<dyn AdminClient>, KafkaClientError> {
        Ok(Arc::new(MemoryAdmin {
            broker: self.clone(),
        }))
    }

    fn version(&self) -> String {
        format!("memory-broker {}", env!("CARGO_PKG_VERSION"))
    }
}

#[derive(Debug, Default)]
struct Session {
    subscription: Option<String>,
    auto_assigned: bool,
    assigned: Vec<TopicPartition>,
    positions: HashMap<TopicPartition, Offset>,
    stored: HashMap<TopicPartition, Offset>,
    paused: HashSet<TopicPartition>,
    pending: VecDeque<BrokerEvent>,
    cursor: usize,
    closed: bool,
}

#[derive(Debug, Default)]
struct CallLog {
    pauses: Vec<TopicPartition>,
    resumes: Vec<TopicPartition>,
    commits: usize,
    stores: Vec<(TopicPartition, Offset)>,
}

/// Consumer session on a [`MemoryBroker`]
#[derive(Debug)]
pub struct MemoryConsumer {
    broker: MemoryBroker,
    id: usize,
    group_id: String,
    auto_offset_reset: AutoOffsetReset,
    allow_auto_create: bool,
    session: Mutex<Session>,
    calls: Mutex<CallLog>,
}

impl MemoryConsumer {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn assignment(&self) -> Vec<TopicPartition> {
        self.session.lock().assigned.clone()
    }

    /// Partitions paused so far, one entry per pause call and partition
    pub fn pause_log(&self) -> Vec<TopicPartition> {
        self.calls.lock().pauses.clone()
    }

    pub fn resume_log(&self) -> Vec<TopicPartition> {
        self.calls.lock().resumes.clone()
    }

    pub fn commit_count(&self) -> usize {
        self.calls.lock().commits
    }

    /// Offsets of the messages stored so far, in store order
    pub fn store_log(&self) -> Vec<(TopicPartition, Offset)> {
        self.calls.lock().stores.clone()
    }

    pub fn is_stored(&self, message: &Message) -> bool {
        let tp = message.topic_partition();
        self.calls
            .lock()
            .stores
            .iter()
            .any(|(stored_tp, offset)| *stored_tp == tp && *offset == message.offset)
    }

    /// Simulate the group coordinator revoking partitions from this session
    pub fn revoke(&self, partitions: &[TopicPartition]) {
        {
            let mut session = self.session.lock();
            session.auto_assigned = true;
            session.assigned.retain(|tp| !partitions.contains(tp));
            for tp in partitions {
                session.positions.remove(tp);
                session.paused.remove(tp);
            }
            session
                .pending
                .push_back(BrokerEvent::RevokedPartitions(partitions.to_vec()));
        }
        self.broker.notify.notify_waiters();
    }

    /// Simulate the group coordinator assigning partitions to this session
    pub fn assign(&self, partitions: &[TopicPartition]) {
        {
            let state = self.broker.state.lock();
            let mut session = self.session.lock();
            session.auto_assigned = true;
            for tp in partitions {
                if !session.assigned.contains(tp) {
                    let position = self.start_position(&state, tp);
                    session.assigned.push(tp.clone());
                    session.positions.insert(tp.clone(), position);
                }
            }
            session
                .pending
                .push_back(BrokerEvent::AssignedPartitions(partitions.to_vec()));
        }
        self.broker.notify.notify_waiters();
    }

    /// Queue a transport error for the next poll
    pub fn inject_error(&self, error: KafkaClientError) {
        self.session.lock().pending.push_back(BrokerEvent::Error(error));
        self.broker.notify.notify_waiters();
    }

    /// Queue `message` for the next poll, whether or not its partition is assigned
    pub fn inject_message(&self, message: Message) {
        self.session
            .lock()
            .pending
            .push_back(BrokerEvent::Message(message));
        self.broker.notify.notify_waiters();
    }

    fn start_position(&self, state: &BrokerState, tp: &TopicPartition) -> Offset {
        let committed = state
            .committed
            .get(&self.group_id)
            .and_then(|offsets| offsets.get(tp).copied());

        committed.unwrap_or_else(|| match self.auto_offset_reset {
            AutoOffsetReset::Earliest => 0,
            AutoOffsetReset::Latest => state.log(tp).map(|l| l.len() as Offset).unwrap_or(0),
        })
    }

    fn next_event(&self) -> Option<BrokerEvent> {
        let mut state = self.broker.state.lock();
        let mut session = self.session.lock();

        if let Some(event) = session.pending.pop_front() {
            return Some(event);
        }

        if !session.auto_assigned {
            if let Some(topic) = session.subscription.clone() {
                if state.ensure_topic(&topic, self.allow_auto_create) {
                    let count = state.partition_count(&topic).unwrap_or(0);
                    let partitions: Vec<TopicPartition> = (0..count)
                        .map(|p| TopicPartition::new(topic.clone(), p as PartitionId))
                        .collect();
                    for tp in &partitions {
                        let position = self.start_position(&state, tp);
                        session.positions.insert(tp.clone(), position);
                    }
                    session.assigned = partitions.clone();
                    session.auto_assigned = true;
                    return Some(BrokerEvent::AssignedPartitions(partitions));
                }
            }
        }

        let count = session.assigned.len();
        for step in 0..count {
            let index = (session.cursor + step) % count;
            let tp = session.assigned[index].clone();
            if session.paused.contains(&tp) {
                continue;
            }

            let position = session.positions.get(&tp).copied().unwrap_or(0);
            let record = state
                .log(&tp)
                .and_then(|log| log.get(usize::try_from(position).ok()?))
                .cloned();

            if let Some(message) = record {
                session.positions.insert(tp, position + 1);
                session.cursor = (index + 1) % count;
                return Some(BrokerEvent::Message(message));
            }
        }

        None
    }

    fn commit_stored(&self) -> usize {
        let mut state = self.broker.state.lock();
        let stored: Vec<(TopicPartition, Offset)> = self.session.lock().stored.drain().collect();
        let committed = state.committed.entry(self.group_id.clone()).or_default();
        let count = stored.len();
        committed.extend(stored);
        count
    }
}

#[async_trait]
impl ConsumerClient for MemoryConsumer {
    async fn poll(&self, timeout: Duration) -> Option<BrokerEvent> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.session.lock().closed {
                return None;
            }
            if let Some(event) = self.next_event() {
                return Some(event);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    fn subscribe(&self, topic: &str) -> Result<(), KafkaClientError> {
        let mut session = self.session.lock();
        if session.closed {
            return Err(KafkaClientError::consumer("consumer is closed"));
        }
        session.subscription = Some(topic.to_string());
        debug!("{} subscribed to {}", self.name(), topic);
        Ok(())
    }

    fn pause(&self, partitions: &[TopicPartition]) -> Result<(), KafkaClientError> {
        fault(&mut self.broker.state.lock().faults.pause)?;
        self.session.lock().paused.extend(partitions.iter().cloned());
        self.calls.lock().pauses.extend(partitions.iter().cloned());
        Ok(())
    }

    fn resume(&self, partitions: &[TopicPartition]) -> Result<(), KafkaClientError> {
        fault(&mut self.broker.state.lock().faults.resume)?;
        {
            let mut session = self.session.lock();
            for tp in partitions {
                session.paused.remove(tp);
            }
        }
        self.calls.lock().resumes.extend(partitions.iter().cloned());
        self.broker.notify.notify_waiters();
        Ok(())
    }

    async fn commit(&self) -> Result<(), KafkaClientError> {
        fault(&mut self.broker.state.lock().faults.commit)?;
        let count = self.commit_stored();
        self.calls.lock().commits += 1;
        debug!("{} committed {} partition offsets", self.name(), count);
        Ok(())
    }

    fn store_offset(&self, message: &Message) -> Result<Vec<PartitionResult>, KafkaClientError> {
        let tp = message.topic_partition();
        let next = message.offset + 1;

        let partition_error = {
            let mut state = self.broker.state.lock();
            fault(&mut state.faults.store)?;
            match state.faults.store_partition.take() {
                Some(error) => Some(error),
                None if state.log(&tp).is_none() => Some(BrokerError::new(
                    ErrorCode::UnknownTopicOrPartition,
                    format!("{} does not exist", tp),
                )),
                None => None,
            }
        };

        if partition_error.is_none() {
            self.session.lock().stored.insert(tp.clone(), next);
            self.calls.lock().stores.push((tp.clone(), message.offset));
        }

        Ok(vec![PartitionResult {
            topic_partition: tp,
            offset: next,
            error: partition_error,
        }])
    }

    async fn close(&self) {
        if std::mem::replace(&mut self.session.lock().closed, true) {
            return;
        }
        // librdkafka commits stored offsets on close when auto commit is on
        let count = self.commit_stored();
        info!("Closed {} ({} partition offsets committed)", self.name(), count);
        self.broker.notify.notify_waiters();
    }

    fn name(&self) -> String {
        format!("memory-consumer-{}@{}", self.id, self.group_id)
    }
}

/// Producer session on a [`MemoryBroker`]
#[derive(Debug)]
pub struct MemoryProducer {
    broker: MemoryBroker,
    id: usize,
    capacity: usize,
    in_flight: Arc<InFlight>,
    round_robin: AtomicUsize,
    events_tx: mpsc::UnboundedSender<ProducerEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ProducerEvent>>,
    closed: CancellationToken,
}

impl MemoryProducer {
    /// Queue a transport error for the drain task
    pub fn inject_error(&self, error: KafkaClientError, fatal: bool) {
        let _ = self.events_tx.send(ProducerEvent::Error { error, fatal });
    }

    fn hash_partition(key: &Bytes, partition_count: usize) -> usize {
        // FNV-1a
        let mut hash = 2166136261u32;
        for byte in key.iter() {
            hash ^= *byte as u32;
            hash = hash.wrapping_mul(16777619);
        }
        (hash as usize) % partition_count
    }

    fn select_partition(
        &self,
        record: &ProduceRecord,
        partition_count: usize,
    ) -> Result<PartitionId, BrokerError> {
        match record.partition {
            Some(p) if p >= 0 && (p as usize) < partition_count => Ok(p),
            Some(p) => Err(BrokerError::new(
                ErrorCode::UnknownTopicOrPartition,
                format!("{}[{}] does not exist", record.topic, p),
            )),
            None => {
                let index = match &record.key {
                    Some(key) => Self::hash_partition(key, partition_count),
                    None => self.round_robin.fetch_add(1, Ordering::Relaxed) % partition_count,
                };
                Ok(index as PartitionId)
            }
        }
    }

    fn append(&self, record: ProduceRecord) -> Message {
        let mut state = self.broker.state.lock();

        if let Some(error) = state.faults.delivery.take() {
            return Message {
                error: Some(error),
                ..record.into_message(-1, -1)
            };
        }

        if !state.ensure_topic(&record.topic, true) {
            let error = BrokerError::new(
                ErrorCode::UnknownTopicOrPartition,
                format!("topic '{}' does not exist", record.topic),
            );
            return Message {
                error: Some(error),
                ..record.into_message(-1, -1)
            };
        }

        let count = state.partition_count(&record.topic).unwrap_or(0);
        let partition = match self.select_partition(&record, count) {
            Ok(partition) => partition,
            Err(error) => {
                return Message {
                    error: Some(error),
                    ..record.into_message(-1, -1)
                }
            }
        };

        let topic = record.topic.clone();
        let log = state
            .topics
            .get_mut(&topic)
            .and_then(|t| t.partitions.get_mut(partition as usize));

        match log {
            Some(log) => {
                let mut message = record.into_message(partition, log.len() as Offset);
                message.timestamp = Some(now_ms());
                log.push(message.clone());
                message
            }
            None => Message {
                error: Some(BrokerError::new(
                    ErrorCode::UnknownTopicOrPartition,
                    format!("{}[{}] does not exist", topic, partition),
                )),
                ..record.into_message(partition, -1)
            },
        }
    }
}

#[async_trait]
impl ProducerClient for MemoryProducer {
    fn produce(&self, record: ProduceRecord) -> Result<(), KafkaClientError> {
        if self.closed.is_cancelled() {
            return Err(KafkaClientError::producer("producer is closed"));
        }
        if self.in_flight.get() >= self.capacity {
            return Err(KafkaClientError::QueueFull {
                capacity: self.capacity,
            });
        }

        let report = self.append(record);
        self.in_flight.increment();
        self.broker.notify.notify_waiters();

        if self.events_tx.send(ProducerEvent::Delivery(report)).is_err() {
            self.in_flight.decrement();
        }
        Ok(())
    }

    async fn next_event(&self) -> Option<ProducerEvent> {
        let mut events = self.events_rx.lock().await;

        let event = tokio::select! {
            biased;
            event = events.recv() => event,
            _ = self.closed.cancelled() => None,
        };

        if let Some(ProducerEvent::Delivery(_)) = &event {
            self.in_flight.decrement();
        }
        event
    }

    async fn flush(&self, timeout: Duration) -> usize {
        self.in_flight.wait_drained(timeout).await
    }

    async fn close(&self) {
        self.closed.cancel();
        info!("Closed {}", self.name());
    }

    fn name(&self) -> String {
        format!("memory-producer-{}", self.id)
    }
}

/// Admin session on a [`MemoryBroker`]
#[derive(Debug)]
pub struct MemoryAdmin {
    broker: MemoryBroker,
}

#[async_trait]
impl AdminClient for MemoryAdmin {
    async fn create_topic(
        &self,
        topic: NewTopic,
        _timeout: Duration,
    ) -> Result<(), KafkaClientError> {
        if !topic.config.is_empty() {
            debug!("Topic {} config {:?} is not applied in memory", topic.name, topic.config);
        }
        if topic.replication < 1 {
            return Err(KafkaClientError::broker(
                ErrorCode::InvalidReplicationFactor,
                format!("replication factor {} is invalid", topic.replication),
            ));
        }
        self.broker.create_topic(&topic.name, topic.partitions)
    }

    async fn delete_topic(&self, topic: &str, _timeout: Duration) -> Result<(), KafkaClientError> {
        let mut state = self.broker.state.lock();
        if state.topics.remove(topic).is_none() {
            return Err(KafkaClientError::broker(
                ErrorCode::UnknownTopicOrPartition,
                format!("topic '{}' does not exist", topic),
            ));
        }
        for offsets in state.committed.values_mut() {
            offsets.retain(|tp, _| tp.topic != topic);
        }
        info!("Deleted topic {}", topic);
        Ok(())
    }

    fn name(&self) -> String {
        "memory-admin".to_string()
    }
}
