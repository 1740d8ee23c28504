//! Per-partition delivery pipeline
//!
//! Each assigned partition gets one task that receives messages over a
//! rendezvous hand-off and applies the consumer's delivery policy to them in
//! arrival order.

use super::handoff::{handoff, HandoffError, HandoffReceiver, HandoffSender};
use super::{ConsumerContext, DeliveryStrategy};
use crate::broker::check_partition_results;
use crate::error::KafkaClientError;
use crate::message::{Message, TopicPartition};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Order of handling and offset storing for one message
#[async_trait]
pub(crate) trait DeliveryPolicy: Send + Sync + 'static {
    /// An error is a store failure and ends the pipeline
    async fn deliver(&self, ctx: &ConsumerContext, message: &Message)
        -> Result<(), KafkaClientError>;
}

/// Handle first; store only when the handler succeeded
pub(crate) struct AtLeastOnce;

/// Store first; handle only once the store succeeded
pub(crate) struct AtMostOnce;

#[async_trait]
impl DeliveryPolicy for AtLeastOnce {
    async fn deliver(
        &self,
        ctx: &ConsumerContext,
        message: &Message,
    ) -> Result<(), KafkaClientError> {
        if handle(ctx, message).await {
            store(ctx, message)?;
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryPolicy for AtMostOnce {
    async fn deliver(
        &self,
        ctx: &ConsumerContext,
        message: &Message,
    ) -> Result<(), KafkaClientError> {
        store(ctx, message)?;
        handle(ctx, message).await;
        Ok(())
    }
}

async fn handle(ctx: &ConsumerContext, message: &Message) -> bool {
    debug!("Handling message {}...", message);
    let started = Instant::now();

    let result = ctx.handler.handle(&ctx.handle, message).await;
    ctx.metrics.record_handled(result.is_ok(), started.elapsed());

    match result {
        Ok(()) => true,
        Err(err) => {
            error!("Message handling error on {}: {:#}", message, err);
            false
        }
    }
}

fn store(ctx: &ConsumerContext, message: &Message) -> Result<(), KafkaClientError> {
    debug!("Storing offset of {}...", message);
    let results = ctx.client.store_offset(message)?;
    check_partition_results(&results)?;
    ctx.metrics.record_stored();
    Ok(())
}

/// Poll-loop side of a running pipeline
#[derive(Debug)]
pub(crate) struct PartitionPipeline {
    sender: HandoffSender,
    task: JoinHandle<()>,
}

impl PartitionPipeline {
    pub(crate) fn spawn(
        topic_partition: TopicPartition,
        strategy: DeliveryStrategy,
        ctx: Arc<ConsumerContext>,
    ) -> Self {
        let (sender, receiver) = handoff();

        let task = match strategy {
            DeliveryStrategy::AtLeastOnce => {
                tokio::spawn(run(AtLeastOnce, topic_partition, ctx, receiver))
            }
            DeliveryStrategy::AtMostOnce => {
                tokio::spawn(run(AtMostOnce, topic_partition, ctx, receiver))
            }
        };

        Self { sender, task }
    }

    pub(crate) async fn send(&mut self, message: Message) -> Result<(), HandoffError> {
        self.sender.send(message).await
    }

    pub(crate) async fn send_timeout(
        &mut self,
        message: Message,
        timeout: Duration,
    ) -> Result<(), HandoffError> {
        self.sender.send_timeout(message, timeout).await
    }

    /// Close the hand-off; the task finishes its in-flight message and exits
    pub(crate) fn close(self) -> JoinHandle<()> {
        drop(self.sender);
        self.task
    }
}

async fn run<P: DeliveryPolicy>(
    policy: P,
    topic_partition: TopicPartition,
    ctx: Arc<ConsumerContext>,
    receiver: HandoffReceiver,
) {
    debug!("Pipeline for {} started", topic_partition);

    while let Some(message) = receiver.recv().await {
        if let Err(err) = policy.deliver(&ctx, &message).await {
            error!("Failed to store offset of {}: {}", message, err);
            ctx.fatal(err);
            break;
        }
    }

    debug!("Pipeline for {} finished", topic_partition);
}
