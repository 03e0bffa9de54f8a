//! Observation sources.
//!
//! Four unordered sources feed one observation channel: the backend poll,
//! the push channel (transport external to this crate), the local
//! activity-file fallback, and user-driven settings changes. The file
//! source follows a two-tier strategy: filesystem events are hints only,
//! and a periodic re-read runs regardless so a missed event never wedges
//! the derived state.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Duration, Utc};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::SourceConfig;
use crate::error::{AgentResult, SourceError};
use crate::types::{Observation, SettingsChange};

/// Wire body returned by the activity backend's status endpoint.
#[derive(Debug, Deserialize)]
struct StatusBody {
    active: bool,
    #[serde(default)]
    disabled: bool,
    timeout_minutes: Option<u32>,
    last_activity_at: Option<DateTime<Utc>>,
}

impl StatusBody {
    fn into_observation(self) -> Observation {
        Observation {
            active: self.active,
            disabled: self.disabled,
            timeout_minutes: self.timeout_minutes,
            last_activity_at: self.last_activity_at,
            source_online: true,
        }
    }
}

/// Persistence record written by the local activity reporter.
#[derive(Debug, Deserialize)]
struct ActivityRecord {
    last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    disabled: bool,
}

/// One-shot poll of the backend status endpoint.
pub async fn poll_once(endpoint: &str) -> Result<Observation, SourceError> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()?;
    poll_with(&client, endpoint).await
}

async fn poll_with(client: &reqwest::Client, endpoint: &str) -> Result<Observation, SourceError> {
    let body: StatusBody = client
        .get(endpoint)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(body.into_observation())
}

/// Read the activity reporter's file and derive an observation from it.
pub fn read_activity_observation(
    path: &Path,
    timeout_minutes: u32,
    now: DateTime<Utc>,
) -> Result<Observation, SourceError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SourceError::ActivityFile(format!("{}: {}", path.display(), e)))?;
    let record: ActivityRecord = serde_json::from_str(&content)?;

    let active = record
        .last_activity_at
        .map(|at| now - at < Duration::minutes(timeout_minutes as i64))
        .unwrap_or(false);

    Ok(Observation {
        active,
        disabled: record.disabled,
        timeout_minutes: None,
        last_activity_at: record.last_activity_at,
        source_online: true,
    })
}

/// Merge a user settings delta over the last known observation.
pub fn merge_settings(base: Observation, change: &SettingsChange) -> Observation {
    Observation {
        disabled: change.disabled.unwrap_or(base.disabled),
        timeout_minutes: change.timeout_minutes.or(base.timeout_minutes),
        ..base
    }
}

/// All observation sources for one agent, feeding a shared channel.
pub struct SourceSet {
    config: SourceConfig,
    default_timeout_minutes: u32,
    tx: mpsc::Sender<Observation>,
    last: Arc<Mutex<Observation>>,
    running: Arc<Mutex<bool>>,
    push_tx: mpsc::Sender<Observation>,
    push_rx: Mutex<Option<mpsc::Receiver<Observation>>>,
    settings_tx: mpsc::Sender<SettingsChange>,
    settings_rx: Mutex<Option<mpsc::Receiver<SettingsChange>>>,
}

impl SourceSet {
    pub fn new(
        config: SourceConfig,
        default_timeout_minutes: u32,
        tx: mpsc::Sender<Observation>,
    ) -> Self {
        let (push_tx, push_rx) = mpsc::channel(16);
        let (settings_tx, settings_rx) = mpsc::channel(16);
        Self {
            config,
            default_timeout_minutes,
            tx,
            last: Arc::new(Mutex::new(Observation::offline())),
            running: Arc::new(Mutex::new(false)),
            push_tx,
            push_rx: Mutex::new(Some(push_rx)),
            settings_tx,
            settings_rx: Mutex::new(Some(settings_rx)),
        }
    }

    /// Sender for the external push transport to deliver observations on.
    pub fn push_sender(&self) -> mpsc::Sender<Observation> {
        self.push_tx.clone()
    }

    /// Sender for user-driven settings changes.
    pub fn settings_sender(&self) -> mpsc::Sender<SettingsChange> {
        self.settings_tx.clone()
    }

    /// Start all configured source loops.
    pub fn start(&self) -> AgentResult<()> {
        *self.running.lock().unwrap() = true;

        if let Some(endpoint) = self.config.endpoint.clone() {
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .map_err(SourceError::Network)?;
            info!(endpoint = %endpoint, "Starting poll source");
            tokio::spawn(run_poll_loop(
                client,
                endpoint,
                self.config.poll_interval_seconds,
                self.tx.clone(),
                Arc::clone(&self.last),
                Arc::clone(&self.running),
            ));
        }

        if let Some(path) = self.config.activity_file.clone() {
            let path = PathBuf::from(path);
            info!(path = %path.display(), "Starting activity-file source");
            tokio::spawn(run_file_loop(
                path,
                self.config.file_scan_interval_seconds,
                self.config.use_file_events,
                self.default_timeout_minutes,
                self.tx.clone(),
                Arc::clone(&self.last),
                Arc::clone(&self.running),
            ));
        }

        if let Some(rx) = self.push_rx.lock().unwrap().take() {
            tokio::spawn(run_push_loop(
                rx,
                self.tx.clone(),
                Arc::clone(&self.last),
                Arc::clone(&self.running),
            ));
        }

        if let Some(rx) = self.settings_rx.lock().unwrap().take() {
            tokio::spawn(run_settings_loop(
                rx,
                self.tx.clone(),
                Arc::clone(&self.last),
                Arc::clone(&self.running),
            ));
        }

        Ok(())
    }

    /// Stop all source loops at their next wakeup.
    pub fn stop(&self) {
        info!("Stopping observation sources");
        *self.running.lock().unwrap() = false;
    }
}

async fn emit(
    tx: &mpsc::Sender<Observation>,
    last: &Arc<Mutex<Observation>>,
    observation: Observation,
) {
    *last.lock().unwrap() = observation.clone();
    if tx.send(observation).await.is_err() {
        warn!("Observation channel closed; dropping observation");
    }
}

async fn run_poll_loop(
    client: reqwest::Client,
    endpoint: String,
    interval_secs: u64,
    tx: mpsc::Sender<Observation>,
    last: Arc<Mutex<Observation>>,
    running: Arc<Mutex<bool>>,
) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
    let mut policy = ExponentialBackoff {
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    };

    loop {
        interval.tick().await;
        if !*running.lock().unwrap() {
            break;
        }

        match poll_with(&client, &endpoint).await {
            Ok(observation) => {
                policy.reset();
                trace!(active = observation.active, "Poll observation");
                emit(&tx, &last, observation).await;
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Status poll failed");
                emit(&tx, &last, Observation::offline()).await;
                if let Some(delay) = policy.next_backoff() {
                    debug!(delay_ms = delay.as_millis() as u64, "Backing off before next poll");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

async fn run_file_loop(
    path: PathBuf,
    scan_interval_secs: u64,
    use_file_events: bool,
    timeout_minutes: u32,
    tx: mpsc::Sender<Observation>,
    last: Arc<Mutex<Observation>>,
    running: Arc<Mutex<bool>>,
) {
    let (hint_tx, mut hint_rx) = mpsc::channel::<()>(8);

    // Event watcher is a hint only; the scan interval below is the
    // authoritative re-read.
    let _watcher = if use_file_events {
        match watch_file(&path, hint_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Activity-file event watch failed; polling only"
                );
                None
            }
        }
    } else {
        None
    };

    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(scan_interval_secs));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            hint = hint_rx.recv() => {
                if hint.is_none() {
                    // Watcher gone; keep scanning on the interval.
                    interval.tick().await;
                }
            }
        }
        if !*running.lock().unwrap() {
            break;
        }

        match read_activity_observation(&path, timeout_minutes, Utc::now()) {
            Ok(observation) => {
                trace!(active = observation.active, "Activity-file observation");
                emit(&tx, &last, observation).await;
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Activity file unreadable");
                emit(&tx, &last, Observation::offline()).await;
            }
        }
    }
}

fn watch_file(path: &Path, hint_tx: mpsc::Sender<()>) -> Result<RecommendedWatcher, SourceError> {
    let watch_dir = path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let target = path.to_path_buf();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if event.paths.iter().any(|p| p == &target) {
                    let _ = hint_tx.try_send(());
                }
            }
            Err(e) => {
                warn!(error = %e, "Activity-file event error");
            }
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

async fn run_push_loop(
    mut rx: mpsc::Receiver<Observation>,
    tx: mpsc::Sender<Observation>,
    last: Arc<Mutex<Observation>>,
    running: Arc<Mutex<bool>>,
) {
    while let Some(observation) = rx.recv().await {
        if !*running.lock().unwrap() {
            break;
        }
        trace!(active = observation.active, "Push observation");
        emit(&tx, &last, observation).await;
    }
}

async fn run_settings_loop(
    mut rx: mpsc::Receiver<SettingsChange>,
    tx: mpsc::Sender<Observation>,
    last: Arc<Mutex<Observation>>,
    running: Arc<Mutex<bool>>,
) {
    while let Some(change) = rx.recv().await {
        if !*running.lock().unwrap() {
            break;
        }
        let merged = {
            let base = last.lock().unwrap().clone();
            merge_settings(base, &change)
        };
        debug!(
            disabled = merged.disabled,
            timeout = ?merged.timeout_minutes,
            "Settings change merged"
        );
        emit(&tx, &last, merged).await;
    }
}
