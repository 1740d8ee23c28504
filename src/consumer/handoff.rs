//! Rendezvous hand-off between the poll loop and one partition pipeline
//!
//! The pipeline announces that it is idle by parking a oneshot slot in a
//! channel of depth one; the poll loop completes a send only by filling such a
//! slot. No message is ever buffered between the two sides.

use crate::message::Message;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

type Slot = oneshot::Sender<Message>;

/// Send failure; the message is handed back to the caller
#[derive(Debug)]
pub(crate) enum HandoffError {
    /// No pipeline became ready in time
    Timeout(Message),
    /// The pipeline has exited
    Closed(Message),
}

pub(crate) fn handoff() -> (HandoffSender, HandoffReceiver) {
    let (ready_tx, ready_rx) = mpsc::channel(1);
    (
        HandoffSender { ready: ready_rx },
        HandoffReceiver { ready: ready_tx },
    )
}

/// Poll-loop side; dropping it closes the hand-off
#[derive(Debug)]
pub(crate) struct HandoffSender {
    ready: mpsc::Receiver<Slot>,
}

impl HandoffSender {
    /// Wait until the pipeline takes `message`
    pub(crate) async fn send(&mut self, message: Message) -> Result<(), HandoffError> {
        match self.ready.recv().await {
            Some(slot) => slot.send(message).map_err(HandoffError::Closed),
            None => Err(HandoffError::Closed(message)),
        }
    }

    /// Like [`send`](Self::send), giving up after `timeout`
    pub(crate) async fn send_timeout(
        &mut self,
        message: Message,
        timeout: Duration,
    ) -> Result<(), HandoffError> {
        match tokio::time::timeout(timeout, self.ready.recv()).await {
            Ok(Some(slot)) => slot.send(message).map_err(HandoffError::Closed),
            Ok(None) => Err(HandoffError::Closed(message)),
            Err(_) => Err(HandoffError::Timeout(message)),
        }
    }
}

/// Pipeline side
#[derive(Debug)]
pub(crate) struct HandoffReceiver {
    ready: mpsc::Sender<Slot>,
}

impl HandoffReceiver {
    /// Next message, `None` once the sender is gone
    pub(crate) async fn recv(&self) -> Option<Message> {
        let (slot, message) = oneshot::channel();
        self.ready.send(slot).await.ok()?;
        message.await.ok()
    }
}
