//! Run command - main agent execution loop.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::broadcast::{BroadcastSerializer, ChannelNotifier, Notifier};
use crate::config::Config;
use crate::error::AgentError;
use crate::gate::{OwnershipTracker, Presentation, ResourceRegistry, TransitionStateMachine};
use crate::source::SourceSet;
use crate::status::StatusAdapter;
use crate::types::{Observation, StatusPayload};

/// Run the agent in foreground mode.
pub async fn run_foreground() -> Result<()> {
    info!("Running agent in foreground mode");

    let config = Config::load().map_err(AgentError::from)?;
    info!(config_path = ?config.path, "Configuration loaded");

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    // Spawn shutdown signal handler
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
        info!("Received shutdown signal");
        let _ = shutdown_tx_clone.send(()).await;
    });

    run_agent(config, shutdown_rx).await
}

/// Generate a hostname-based agent ID.
fn generate_agent_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let random: u32 = rand::random();
    format!("pausegate-{}-{:08x}", hostname, random)
}

/// Resolve the agent ID from config or generate one.
fn resolve_agent_id(config: &Config) -> String {
    if config.agent.agent_id == "auto" {
        generate_agent_id()
    } else {
        config.agent.agent_id.clone()
    }
}

/// Overlay stand-in for the agent process itself: the real overlay renders
/// inside host documents, which are out of scope here.
struct LogPresentation;

#[async_trait]
impl Presentation for LogPresentation {
    async fn show(&self, payload: &StatusPayload) {
        info!(
            source_online = payload.source_online,
            timeout_minutes = payload.timeout_minutes,
            "Pause overlay shown"
        );
    }

    async fn hide(&self) {
        info!("Pause overlay hidden");
    }

    async fn refresh(&self, payload: &StatusPayload) {
        debug!(
            elapsed = ?payload.elapsed_seconds(chrono::Utc::now()),
            "Pause overlay refreshed"
        );
    }
}

/// Main agent processing loop.
pub async fn run_agent(config: Config, shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
    let agent_id = resolve_agent_id(&config);
    info!(agent_id = %agent_id, "Agent ID configured");

    // Delivery hub and broadcast serializer. Further receivers attach as
    // host documents connect; the agent itself holds one for visibility.
    let hub = Arc::new(ChannelNotifier::new());
    let serializer = Arc::new(BroadcastSerializer::new(
        Arc::clone(&hub) as Arc<dyn Notifier>
    ));

    let (local_receiver, mut local_rx) = hub.attach(config.broadcast.channel_capacity);
    serializer.register_receiver(local_receiver);
    tokio::spawn(async move {
        while let Some(payload) = local_rx.recv().await {
            debug!(
                active = payload.active,
                source_online = payload.source_online,
                "Status broadcast delivered"
            );
        }
    });

    // Local gate machine for the agent's own document.
    let registry = Arc::new(ResourceRegistry::new());
    let ownership = OwnershipTracker::new(Arc::clone(&registry));
    let machine = Arc::new(TransitionStateMachine::new(
        "local",
        Arc::new(LogPresentation),
        ownership,
    ));

    let adapter = Arc::new(StatusAdapter::new(
        Arc::clone(&serializer),
        config.gate.timeout_minutes,
    ));
    adapter.register_machine(Arc::clone(&machine));

    // Observation sources
    let (observation_tx, observation_rx) = mpsc::channel::<Observation>(64);
    let sources = SourceSet::new(
        config.source.clone(),
        config.gate.timeout_minutes,
        observation_tx,
    );
    sources.start()?;

    // Seam for the external transport: pushed observations and user
    // settings changes enter through these handles.
    let _push_tx = sources.push_sender();
    let _settings_tx = sources.settings_sender();

    info!(
        agent_id = %agent_id,
        endpoint = ?config.source.endpoint,
        activity_file = ?config.source.activity_file,
        receivers = serializer.receiver_count(),
        "Agent started, observing activity"
    );

    adapter.run(observation_rx, shutdown_rx).await;

    sources.stop();
    serializer.unregister_receiver(local_receiver);
    hub.detach(local_receiver);
    info!(final_mode = %machine.mode(), "Agent stopped");
    Ok(())
}
