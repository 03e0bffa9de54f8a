//! In-process delivery hub.
//!
//! Default `Notifier` implementation backed by one bounded mpsc channel per
//! attached receiver. The wire transport to real tabs lives outside this
//! crate; anything that can hold the receiving end of a channel can join
//! the fan-out.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broadcast::Notifier;
use crate::error::DeliveryError;
use crate::types::{ReceiverId, StatusPayload};

pub struct ChannelNotifier {
    channels: Mutex<HashMap<ReceiverId, mpsc::Sender<StatusPayload>>>,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a new receiver, returning its identity and the channel its
    /// payloads arrive on.
    pub fn attach(&self, capacity: usize) -> (ReceiverId, mpsc::Receiver<StatusPayload>) {
        let id = ReceiverId::new();
        let (tx, rx) = mpsc::channel(capacity);
        self.channels.lock().unwrap().insert(id, tx);
        debug!(receiver = %id, "Receiver attached");
        (id, rx)
    }

    pub fn detach(&self, id: ReceiverId) {
        if self.channels.lock().unwrap().remove(&id).is_some() {
            debug!(receiver = %id, "Receiver detached");
        }
    }

    pub fn attached_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }
}

impl Default for ChannelNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(
        &self,
        receiver: ReceiverId,
        payload: &StatusPayload,
    ) -> Result<(), DeliveryError> {
        let sender = self
            .channels
            .lock()
            .unwrap()
            .get(&receiver)
            .cloned()
            .ok_or(DeliveryError::Unreachable(receiver))?;

        if sender.send(payload.clone()).await.is_err() {
            // Receiver side dropped; forget the channel.
            warn!(receiver = %receiver, "Receiver channel closed; detaching");
            self.detach(receiver);
            return Err(DeliveryError::Unreachable(receiver));
        }
        Ok(())
    }
}
