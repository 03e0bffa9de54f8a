//! Status adapter: translates raw observations into transition requests and
//! broadcast requests.
//!
//! Thin wiring boundary. The mapping rule is fixed: a set disabled flag
//! wins, then observed activity, otherwise inactive.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::broadcast::BroadcastSerializer;
use crate::gate::TransitionStateMachine;
use crate::types::{Mode, Observation, StatusPayload};

/// Derive the target mode for an observation.
pub fn derive_mode(observation: &Observation) -> Mode {
    if observation.disabled {
        Mode::Disabled
    } else if observation.active {
        Mode::Active
    } else {
        Mode::Inactive
    }
}

pub struct StatusAdapter {
    machines: Mutex<Vec<Arc<TransitionStateMachine>>>,
    broadcaster: Arc<BroadcastSerializer>,
    default_timeout_minutes: u32,
}

impl StatusAdapter {
    pub fn new(broadcaster: Arc<BroadcastSerializer>, default_timeout_minutes: u32) -> Self {
        Self {
            machines: Mutex::new(Vec::new()),
            broadcaster,
            default_timeout_minutes,
        }
    }

    /// Register a gate machine to be driven by incoming observations.
    pub fn register_machine(&self, machine: Arc<TransitionStateMachine>) {
        self.machines.lock().unwrap().push(machine);
    }

    /// Build the immutable status snapshot for an observation.
    pub fn to_payload(&self, observation: &Observation) -> StatusPayload {
        StatusPayload {
            active: observation.active,
            disabled_flag: observation.disabled,
            timeout_minutes: observation
                .timeout_minutes
                .unwrap_or(self.default_timeout_minutes),
            last_activity_at: observation.last_activity_at,
            source_online: observation.source_online,
        }
    }

    /// Apply one observation: transition every registered machine, then fan
    /// the payload out to the broadcast receivers.
    pub async fn handle(&self, observation: Observation) {
        let mode = derive_mode(&observation);
        let payload = self.to_payload(&observation);
        debug!(
            mode = %mode,
            active = payload.active,
            source_online = payload.source_online,
            "Observation received"
        );

        let machines: Vec<Arc<TransitionStateMachine>> =
            self.machines.lock().unwrap().iter().cloned().collect();
        for machine in machines {
            machine.transition(mode, payload.clone()).await;
        }

        self.broadcaster.request_broadcast(payload).await;
    }

    /// Consume observations until the channel closes or shutdown fires.
    pub async fn run(
        &self,
        mut observations: mpsc::Receiver<Observation>,
        mut shutdown: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                maybe = observations.recv() => {
                    match maybe {
                        Some(observation) => self.handle(observation).await,
                        None => {
                            info!("Observation channel closed; adapter stopping");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutdown received; adapter stopping");
                    break;
                }
            }
        }
    }
}
