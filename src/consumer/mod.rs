//! Flow-controlled consumer
//!
//! A [`Consumer`] runs a single poll loop over its broker client and routes
//! every message to a per-partition pipeline task. Each pipeline handles its
//! messages one at a time, in order, and stores offsets according to the
//! [`DeliveryStrategy`]. A partition whose handler falls behind for longer than
//! 75% of `max.poll.interval.ms` is committed and paused until the handler
//! takes the waiting message, then resumed, so the group coordinator never
//! sees the consumer as stuck.

mod handoff;
mod pipeline;

use self::handoff::HandoffError;
use self::pipeline::PartitionPipeline;
use crate::broker::{BrokerEvent, ConsumerClient};
use crate::config::ClientConfig;
use crate::error::KafkaClientError;
use crate::message::{Message, TopicPartition};
use crate::metrics::{ConsumerMetrics, ConsumerMetricsSnapshot};
use crate::signal::shutdown_signal;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// When a message's offset is stored relative to its handling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStrategy {
    /// Handle, then store on success; a failed message is redelivered after restart
    #[default]
    AtLeastOnce,
    /// Store, then handle; a failed message is never redelivered
    AtMostOnce,
}

impl fmt::Display for DeliveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStrategy::AtLeastOnce => write!(f, "at-least-once"),
            DeliveryStrategy::AtMostOnce => write!(f, "at-most-once"),
        }
    }
}

/// User callbacks of a consumer
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    /// Process one message; an error is logged and, under at-least-once,
    /// leaves the offset unstored
    async fn handle(&self, consumer: &ConsumerHandle, message: &Message) -> anyhow::Result<()>;

    /// Called once per unrecoverable error, after the consumer was told to stop
    fn fatal(&self, consumer: &ConsumerHandle, error: KafkaClientError);
}

/// Cloneable control handle of a running consumer
#[derive(Clone)]
pub struct ConsumerHandle {
    token: CancellationToken,
    started: Arc<AtomicBool>,
    name: Arc<str>,
    metrics: Arc<ConsumerMetrics>,
}

impl ConsumerHandle {
    /// Ask the poll loop to exit; safe to call any number of times from any task
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            info!("Stopping {}", self);
            self.token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.token.is_cancelled()
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn metrics(&self) -> ConsumerMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl fmt::Display for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Consumer {}", self.name)
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// State shared by the poll loop and every pipeline task
pub(crate) struct ConsumerContext {
    pub(crate) handle: ConsumerHandle,
    pub(crate) handler: Arc<dyn ConsumerHandler>,
    pub(crate) client: Arc<dyn ConsumerClient>,
    pub(crate) metrics: Arc<ConsumerMetrics>,
}

impl ConsumerContext {
    /// Stop the consumer and report `err` to the handler
    pub(crate) fn fatal(&self, err: KafkaClientError) {
        error!("{} failed: {}", self.handle, err);
        self.handle.stop();
        self.handler.fatal(&self.handle, err);
    }
}

/// Flow-controlled consumer of one topic
pub struct Consumer {
    ctx: Arc<ConsumerContext>,
    strategy: DeliveryStrategy,
    wait_timeout: Duration,
}

impl Consumer {
    /// Subscribe `client` to `topic`
    ///
    /// The hand-off wait timeout is 75% of `max.poll.interval.ms` from
    /// `config` (default 300000 ms).
    pub fn new(
        client: Arc<dyn ConsumerClient>,
        config: &ClientConfig,
        topic: &str,
        handler: Arc<dyn ConsumerHandler>,
        strategy: DeliveryStrategy,
    ) -> Result<Self, KafkaClientError> {
        info!("Consumer config: {}", config);
        info!("Creating {} consumer for topic {}...", strategy, topic);

        let wait_timeout = config.max_poll_interval()? * 3 / 4;
        info!("Consumer message wait timeout: {:?}", wait_timeout);

        client.subscribe(topic)?;

        let metrics = Arc::new(ConsumerMetrics::default());
        let handle = ConsumerHandle {
            token: CancellationToken::new(),
            started: Arc::new(AtomicBool::new(false)),
            name: Arc::from(client.name()),
            metrics: metrics.clone(),
        };

        Ok(Self {
            ctx: Arc::new(ConsumerContext {
                handle,
                handler,
                client,
                metrics,
            }),
            strategy,
            wait_timeout,
        })
    }

    pub fn handle(&self) -> ConsumerHandle {
        self.ctx.handle.clone()
    }

    pub fn stop(&self) {
        self.ctx.handle.stop();
    }

    pub fn strategy(&self) -> DeliveryStrategy {
        self.strategy
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    pub fn metrics(&self) -> ConsumerMetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// Run until [`stop`](ConsumerHandle::stop), a fatal error, SIGINT or SIGTERM
    pub async fn start(&self, poll_interval: Duration) {
        self.start_with_shutdown(poll_interval, shutdown_signal()).await
    }

    /// Like [`start`](Self::start), stopping when `shutdown` resolves instead of on signals
    pub async fn start_with_shutdown<F>(&self, poll_interval: Duration, shutdown: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.ctx.handle.clone();
        if handle.is_stopped() {
            info!("{} was stopped before start", self);
            self.ctx.client.close().await;
            return;
        }

        if handle.started.swap(true, Ordering::AcqRel) {
            warn!("{} is already running", self);
            return;
        }
        info!("Starting {} polling every {:?}...", self, poll_interval);

        let listener = {
            let handle = handle.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown => {
                        info!("{} received shutdown signal", handle);
                        handle.stop();
                    }
                    _ = handle.token.cancelled() => {}
                }
            })
        };

        let mut pipelines = HashMap::new();

        while handle.is_running() {
            match self.ctx.client.poll(poll_interval).await {
                None => continue,
                Some(BrokerEvent::Message(message)) => self.route(&mut pipelines, message).await,
                Some(BrokerEvent::Error(err)) => {
                    warn!("Failed to poll: {}", err);
                    self.ctx.metrics.record_poll_error();
                }
                Some(BrokerEvent::AssignedPartitions(partitions)) => {
                    self.assign(&mut pipelines, partitions)
                }
                Some(BrokerEvent::RevokedPartitions(partitions)) => {
                    self.revoke(&mut pipelines, partitions).await
                }
            }
        }

        if let Err(err) = listener.await {
            if err.is_panic() {
                error!("Shutdown listener of {} panicked", self);
            } else {
                warn!("Shutdown listener of {} was cancelled", self);
            }
        }

        let (partitions, tasks): (Vec<TopicPartition>, Vec<JoinHandle<()>>) = pipelines
            .into_iter()
            .map(|(tp, pipeline)| (tp, pipeline.close()))
            .unzip();
        for (tp, result) in partitions.iter().zip(join_all(tasks).await) {
            log_join(tp, result);
        }

        info!("Closing {}...", self);
        self.ctx.client.close().await;
        info!("{} stopped", self);
    }

    fn assign(
        &self,
        pipelines: &mut HashMap<TopicPartition, PartitionPipeline>,
        partitions: Vec<TopicPartition>,
    ) {
        for tp in partitions {
            if pipelines.contains_key(&tp) {
                warn!("{} is already assigned, keeping its pipeline", tp);
                continue;
            }
            info!("Assigned {}", tp);
            let pipeline = PartitionPipeline::spawn(tp.clone(), self.strategy, self.ctx.clone());
            pipelines.insert(tp, pipeline);
        }
    }

    async fn revoke(
        &self,
        pipelines: &mut HashMap<TopicPartition, PartitionPipeline>,
        partitions: Vec<TopicPartition>,
    ) {
        for tp in partitions {
            match pipelines.remove(&tp) {
                Some(pipeline) => {
                    info!("Revoking {}, draining its pipeline...", tp);
                    log_join(&tp, pipeline.close().await);
                }
                None => warn!("Revoked {} has no pipeline", tp),
            }
        }
    }

    async fn route(
        &self,
        pipelines: &mut HashMap<TopicPartition, PartitionPipeline>,
        message: Message,
    ) {
        debug!("Received message {}", message);
        self.ctx.metrics.record_received();

        let tp = message.topic_partition();
        let Some(pipeline) = pipelines.get_mut(&tp) else {
            warn!("No pipeline for {}, dropping {}", tp, message);
            self.ctx.metrics.record_dropped();
            return;
        };

        match pipeline.send_timeout(message, self.wait_timeout).await {
            Ok(()) => {}
            Err(HandoffError::Timeout(message)) => self.wait(pipeline, message).await,
            Err(HandoffError::Closed(message)) => self.dropped(&message),
        }
    }

    /// Keep group membership alive while a slow handler catches up
    async fn wait(&self, pipeline: &mut PartitionPipeline, message: Message) {
        let tp = message.topic_partition();
        info!("Waiting for slow consumer on {}...", tp);

        if let Err(err) = self.pause(&tp).await {
            self.ctx.fatal(err);
            return;
        }

        if let Err(HandoffError::Closed(message) | HandoffError::Timeout(message)) =
            pipeline.send(message).await
        {
            self.dropped(&message);
        }

        info!("Resuming {}...", tp);
        match self.ctx.client.resume(std::slice::from_ref(&tp)) {
            Ok(()) => self.ctx.metrics.record_resume(),
            Err(err) => self.ctx.fatal(err),
        }
    }

    async fn pause(&self, tp: &TopicPartition) -> Result<(), KafkaClientError> {
        info!("Pausing {}...", tp);
        self.ctx.client.commit().await?;
        self.ctx.client.pause(std::slice::from_ref(tp))?;
        self.ctx.metrics.record_pause();
        Ok(())
    }

    fn dropped(&self, message: &Message) {
        warn!("Pipeline for {} has exited, dropping {}", message.topic_partition(), message);
        self.ctx.metrics.record_dropped();
    }
}

fn log_join(tp: &TopicPartition, result: Result<(), JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            error!("Pipeline for {} panicked", tp);
        } else {
            warn!("Pipeline for {} was cancelled", tp);
        }
    }
}

impl fmt::Display for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.ctx.handle, f)
    }
}
