//! Single-flight broadcast of status payloads to a fleet of receivers.
//!
//! At most one fan-out pass runs at any instant. Requests arriving while a
//! pass is in flight collapse into a single queued payload (latest wins),
//! which starts the moment the current pass finishes. A queued request also
//! bumps the generation guard so the in-flight enumeration abandons itself
//! at its next per-receiver checkpoint rather than completing a stale
//! delivery.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::types::{ReceiverId, StatusPayload};

pub mod generation;
pub mod hub;

pub use generation::{GenerationGuard, GenerationToken};
pub use hub::ChannelNotifier;

/// Per-receiver delivery collaborator. A failed send to one receiver must
/// not abort delivery to the others.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        receiver: ReceiverId,
        payload: &StatusPayload,
    ) -> Result<(), DeliveryError>;
}

struct BroadcastState {
    in_progress: bool,
    queued: Option<StatusPayload>,
}

/// Serializes fan-out passes over the registered receivers.
pub struct BroadcastSerializer {
    notifier: Arc<dyn Notifier>,
    receivers: Mutex<BTreeSet<ReceiverId>>,
    state: Mutex<BroadcastState>,
    generation: GenerationGuard,
}

impl BroadcastSerializer {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            receivers: Mutex::new(BTreeSet::new()),
            state: Mutex::new(BroadcastState {
                in_progress: false,
                queued: None,
            }),
            generation: GenerationGuard::new(),
        }
    }

    pub fn register_receiver(&self, id: ReceiverId) {
        if self.receivers.lock().unwrap().insert(id) {
            debug!(receiver = %id, "Receiver registered");
        }
    }

    pub fn unregister_receiver(&self, id: ReceiverId) {
        if self.receivers.lock().unwrap().remove(&id) {
            debug!(receiver = %id, "Receiver unregistered");
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.lock().unwrap().len()
    }

    /// Request a fan-out of `payload`. If a pass is already in flight the
    /// payload lands in the single queued slot (latest wins) and this call
    /// returns immediately; otherwise the caller drives the pass, then any
    /// payload queued meanwhile, until the queue is empty.
    pub async fn request_broadcast(&self, payload: StatusPayload) {
        let first = {
            let mut state = self.state.lock().unwrap();
            if state.in_progress {
                // Invalidate the in-flight enumeration; it will stop at its
                // next checkpoint and the queued payload takes over.
                self.generation.begin();
                if state.queued.replace(payload).is_some() {
                    debug!("Coalesced queued broadcast payload");
                } else {
                    debug!("Queued broadcast payload");
                }
                return;
            }
            state.in_progress = true;
            state.queued = None;
            payload
        };

        let mut next = Some(first);
        while let Some(payload) = next.take() {
            let token = self.generation.begin();
            self.fan_out(&payload, token).await;
            let mut state = self.state.lock().unwrap();
            match state.queued.take() {
                Some(queued) => next = Some(queued),
                None => state.in_progress = false,
            }
        }
    }

    /// Deliver `payload` to every registered receiver, checking the
    /// generation token before each send. Returns the number of receivers
    /// reached.
    async fn fan_out(&self, payload: &StatusPayload, token: GenerationToken) -> usize {
        let receivers: Vec<ReceiverId> = self.receivers.lock().unwrap().iter().copied().collect();
        let total = receivers.len();
        let mut delivered = 0;

        for receiver in receivers {
            if !self.generation.is_current(token) {
                debug!(delivered, total, "Fan-out superseded; stopping early");
                return delivered;
            }
            match self.notifier.send(receiver, payload).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(receiver = %receiver, error = %e, "Delivery failed; continuing");
                }
            }
        }

        debug!(delivered, total, "Fan-out pass complete");
        delivered
    }
}
