//! Gate state machine.
//!
//! Serializes mode transitions for one document with latest-wins pending
//! semantics: while a transition's effects are running (they may suspend,
//! e.g. on the overlay hide animation), newer requests overwrite a single
//! pending slot instead of queueing up. When the running effect completes,
//! only the newest pending request is applied, so effects of superseded
//! intermediate requests never run.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::types::{Mode, StatusPayload, TransitionRequest};

pub mod ownership;
pub mod registry;

pub use ownership::{MediaResource, OwnershipTracker};
pub use registry::ResourceRegistry;

/// Overlay collaborator. The agent decides when to show, hide, or refresh
/// the pause presentation; rendering belongs to the host.
#[async_trait]
pub trait Presentation: Send + Sync {
    async fn show(&self, payload: &StatusPayload);
    /// Suspends until the presentation is fully hidden (exit animation
    /// included). Resources are resumed only after this completes.
    async fn hide(&self);
    async fn refresh(&self, payload: &StatusPayload);
}

struct MachineInner {
    mode: Mode,
    payload: StatusPayload,
    executing: bool,
    pending: Option<TransitionRequest>,
}

/// Per-document transition state machine.
///
/// `transition` never fails and always leaves the machine in the requested
/// target mode once applied; per-resource effect failures are logged inside
/// the ownership tracker and never abort a transition.
pub struct TransitionStateMachine {
    label: String,
    presentation: Arc<dyn Presentation>,
    ownership: Arc<OwnershipTracker>,
    inner: Mutex<MachineInner>,
}

impl TransitionStateMachine {
    pub fn new(
        label: impl Into<String>,
        presentation: Arc<dyn Presentation>,
        ownership: Arc<OwnershipTracker>,
    ) -> Self {
        Self {
            label: label.into(),
            presentation,
            ownership,
            inner: Mutex::new(MachineInner {
                mode: Mode::Active,
                payload: StatusPayload::default(),
                executing: false,
                pending: None,
            }),
        }
    }

    pub fn mode(&self) -> Mode {
        self.inner.lock().unwrap().mode
    }

    /// The most recently applied status payload.
    pub fn retained_payload(&self) -> StatusPayload {
        self.inner.lock().unwrap().payload.clone()
    }

    /// Request a transition to `target`. If a transition is already
    /// executing, the request lands in the single pending slot (overwriting
    /// any previously queued request) and this call returns immediately.
    /// Otherwise the caller drives the effect sequence, then drains the
    /// pending slot until it is empty.
    pub async fn transition(&self, target: Mode, payload: StatusPayload) {
        let request = TransitionRequest { target, payload };
        let first = {
            let mut inner = self.inner.lock().unwrap();
            if inner.executing {
                if let Some(superseded) = inner.pending.replace(request) {
                    debug!(
                        machine = %self.label,
                        dropped = %superseded.target,
                        queued = %target,
                        "Superseded queued transition"
                    );
                } else {
                    debug!(machine = %self.label, queued = %target, "Queued transition");
                }
                return;
            }
            inner.executing = true;
            inner.pending = None;
            request
        };

        let mut next = Some(first);
        while let Some(request) = next.take() {
            self.apply(request).await;
            let mut inner = self.inner.lock().unwrap();
            match inner.pending.take() {
                Some(queued) => next = Some(queued),
                None => inner.executing = false,
            }
        }
    }

    async fn apply(&self, request: TransitionRequest) {
        let TransitionRequest { target, payload } = request;
        let previous = {
            let mut inner = self.inner.lock().unwrap();
            let previous = inner.mode;
            inner.payload = payload.clone();
            if previous != target {
                inner.mode = target;
            }
            previous
        };

        if previous == target {
            self.refresh_steady_state(target, &payload).await;
            return;
        }

        info!(
            machine = %self.label,
            from = %previous,
            to = %target,
            source_online = payload.source_online,
            "Mode transition"
        );

        match target {
            Mode::Inactive => self.enter_inactive(&payload).await,
            Mode::Active | Mode::Disabled => self.enter_resumed(target).await,
        }
    }

    /// Same-mode request: refresh the retained payload's derived display and,
    /// for Inactive, re-apply pause to resources that appeared since entry.
    /// The overlay is refreshed, not re-shown; if it was removed out-of-band
    /// the next actual mode change restores it.
    async fn refresh_steady_state(&self, mode: Mode, payload: &StatusPayload) {
        match mode {
            Mode::Inactive => {
                let paused = self.ownership.pause_all().await;
                if paused > 0 {
                    debug!(machine = %self.label, paused, "Steady-state re-pause");
                }
                self.presentation.refresh(payload).await;
            }
            Mode::Active | Mode::Disabled => {
                debug!(machine = %self.label, mode = %mode, "Payload refresh only");
            }
        }
    }

    async fn enter_inactive(&self, payload: &StatusPayload) {
        let paused = self.ownership.watch_start().await;
        debug!(machine = %self.label, paused, "Entered inactive");
        self.presentation.show(payload).await;
    }

    /// Shared enter effect for Active and Disabled: stop the watch, wait for
    /// the overlay to fully hide, then resume what we own. The two modes
    /// differ only in how the presentation decides whether to reappear on
    /// the next observation, not in the effects performed here.
    async fn enter_resumed(&self, target: Mode) {
        self.ownership.watch_stop();
        self.presentation.hide().await;
        let resumed = self.ownership.resume_owned().await;
        debug!(machine = %self.label, mode = %target, resumed, "Entered resumed mode");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceEffectError;
    use crate::types::ResourceId;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Shared ordered event log so tests can assert effect sequencing
    /// across the presentation and resources.
    type EventLog = Arc<Mutex<Vec<String>>>;

    struct FakePresentation {
        events: EventLog,
        /// When set, `hide` suspends until the gate is notified.
        hide_gate: Option<Arc<Notify>>,
        hide_started: Arc<Notify>,
    }

    impl FakePresentation {
        fn new(events: EventLog) -> Arc<Self> {
            Arc::new(Self {
                events,
                hide_gate: None,
                hide_started: Arc::new(Notify::new()),
            })
        }

        fn with_gated_hide(events: EventLog, gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                events,
                hide_gate: Some(gate),
                hide_started: Arc::new(Notify::new()),
            })
        }

        fn log(&self, event: &str) {
            self.events.lock().unwrap().push(event.to_string());
        }
    }

    #[async_trait]
    impl Presentation for FakePresentation {
        async fn show(&self, _payload: &StatusPayload) {
            self.log("show");
        }

        async fn hide(&self) {
            self.log("hide_begin");
            self.hide_started.notify_one();
            if let Some(gate) = &self.hide_gate {
                gate.notified().await;
            }
            self.log("hide_end");
        }

        async fn refresh(&self, _payload: &StatusPayload) {
            self.log("refresh");
        }
    }

    struct LoggedResource {
        id: ResourceId,
        paused: AtomicBool,
        pause_calls: AtomicUsize,
        resume_calls: AtomicUsize,
        events: EventLog,
    }

    impl LoggedResource {
        fn new(id: &str, events: EventLog) -> Arc<Self> {
            Arc::new(Self {
                id: ResourceId::new(id),
                paused: AtomicBool::new(false),
                pause_calls: AtomicUsize::new(0),
                resume_calls: AtomicUsize::new(0),
                events,
            })
        }
    }

    #[async_trait]
    impl MediaResource for LoggedResource {
        fn id(&self) -> ResourceId {
            self.id.clone()
        }

        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }

        async fn pause(&self) -> Result<(), ResourceEffectError> {
            self.pause_calls.fetch_add(1, Ordering::SeqCst);
            self.paused.store(true, Ordering::SeqCst);
            self.events
                .lock()
                .unwrap()
                .push(format!("pause:{}", self.id));
            Ok(())
        }

        async fn resume(&self) -> Result<(), ResourceEffectError> {
            self.resume_calls.fetch_add(1, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
            self.events
                .lock()
                .unwrap()
                .push(format!("resume:{}", self.id));
            Ok(())
        }
    }

    fn payload(active: bool) -> StatusPayload {
        StatusPayload {
            active,
            ..StatusPayload::default()
        }
    }

    fn machine_with(
        presentation: Arc<FakePresentation>,
    ) -> (Arc<TransitionStateMachine>, Arc<ResourceRegistry>) {
        let registry = Arc::new(ResourceRegistry::new());
        let ownership = OwnershipTracker::new(Arc::clone(&registry));
        let machine = Arc::new(TransitionStateMachine::new(
            "test-doc",
            presentation,
            ownership,
        ));
        (machine, registry)
    }

    #[tokio::test]
    async fn scenario_a_inactive_pauses_and_shows() {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let presentation = FakePresentation::new(Arc::clone(&events));
        let (machine, registry) = machine_with(presentation);
        let video = LoggedResource::new("video-1", Arc::clone(&events));
        registry.register(video.clone());

        machine.transition(Mode::Inactive, payload(false)).await;

        assert_eq!(machine.mode(), Mode::Inactive);
        assert_eq!(video.pause_calls.load(Ordering::SeqCst), 1);
        let log = events.lock().unwrap().clone();
        assert_eq!(log, vec!["pause:video-1", "show"]);
    }

    #[tokio::test]
    async fn scenario_b_active_hides_before_resuming_owned() {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let presentation = FakePresentation::new(Arc::clone(&events));
        let (machine, registry) = machine_with(presentation);
        let video = LoggedResource::new("video-1", Arc::clone(&events));
        registry.register(video.clone());

        machine.transition(Mode::Inactive, payload(false)).await;
        machine.transition(Mode::Active, payload(true)).await;

        assert_eq!(machine.mode(), Mode::Active);
        assert_eq!(video.resume_calls.load(Ordering::SeqCst), 1);
        let log = events.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["pause:video-1", "show", "hide_begin", "hide_end", "resume:video-1"]
        );
    }

    #[tokio::test]
    async fn scenario_c_only_newest_pending_request_survives() {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Notify::new());
        let presentation =
            FakePresentation::with_gated_hide(Arc::clone(&events), Arc::clone(&gate));
        let hide_started = Arc::clone(&presentation.hide_started);
        let (machine, registry) = machine_with(presentation);
        let video = LoggedResource::new("video-1", Arc::clone(&events));
        registry.register(video.clone());

        machine.transition(Mode::Inactive, payload(false)).await;

        // Entering Active suspends inside hide().
        let runner = {
            let machine = Arc::clone(&machine);
            tokio::spawn(async move { machine.transition(Mode::Active, payload(true)).await })
        };
        hide_started.notified().await;

        // Three requests race in while the hide is suspended; only the last
        // may ever be applied.
        machine.transition(Mode::Inactive, payload(false)).await;
        machine.transition(Mode::Disabled, payload(true)).await;
        let marker = StatusPayload {
            active: false,
            timeout_minutes: 999,
            ..StatusPayload::default()
        };
        machine.transition(Mode::Inactive, marker.clone()).await;

        gate.notify_one();
        runner.await.unwrap();

        assert_eq!(machine.mode(), Mode::Inactive);
        assert_eq!(machine.retained_payload().timeout_minutes, 999);
        // One resume from the Active entry, then one re-pause for the final
        // Inactive entry; the Disabled request left no trace.
        let log = events.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "pause:video-1",
                "show",
                "hide_begin",
                "hide_end",
                "resume:video-1",
                "pause:video-1",
                "show"
            ]
        );
        assert_eq!(video.resume_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queue_collapse_drops_intermediate_requests() {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Notify::new());
        let presentation =
            FakePresentation::with_gated_hide(Arc::clone(&events), Arc::clone(&gate));
        let hide_started = Arc::clone(&presentation.hide_started);
        let (machine, _registry) = machine_with(presentation);

        machine.transition(Mode::Inactive, payload(false)).await;
        let runner = {
            let machine = Arc::clone(&machine);
            tokio::spawn(async move { machine.transition(Mode::Disabled, payload(true)).await })
        };
        hide_started.notified().await;

        for minutes in 1..=5 {
            let p = StatusPayload {
                timeout_minutes: minutes,
                ..payload(true)
            };
            machine.transition(Mode::Active, p).await;
        }

        // Release the Disabled entry's hide, then pre-store a permit for the
        // drained Active entry's hide.
        gate.notify_one();
        gate.notify_one();
        runner.await.unwrap();

        assert_eq!(machine.mode(), Mode::Active);
        assert_eq!(machine.retained_payload().timeout_minutes, 5);
        // Disabled entry ran once, then a single Active entry; the Active
        // same-as-pending collapses never produced extra hides.
        let hides = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == "hide_begin")
            .count();
        assert_eq!(hides, 2);
    }

    #[tokio::test]
    async fn same_mode_inactive_repauses_new_resources() {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let presentation = FakePresentation::new(Arc::clone(&events));
        let (machine, registry) = machine_with(presentation);

        machine.transition(Mode::Inactive, payload(false)).await;
        assert_eq!(machine.mode(), Mode::Inactive);
        events.lock().unwrap().clear();

        // The watch started by the Inactive entry may pause the late
        // resource first; the refresh must leave it paused either way.
        let late = LoggedResource::new("video-late", Arc::clone(&events));
        registry.register(late.clone());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        events.lock().unwrap().clear();
        let already_paused = late.is_paused();

        machine.transition(Mode::Inactive, payload(false)).await;

        let log = events.lock().unwrap().clone();
        if already_paused {
            // Appearance hook got there first; the refresh still ran.
            assert_eq!(log, vec!["refresh"]);
        } else {
            assert_eq!(log, vec!["pause:video-late", "refresh"]);
        }
        assert!(late.is_paused());
    }

    #[tokio::test]
    async fn same_mode_active_refreshes_payload_only() {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let presentation = FakePresentation::new(Arc::clone(&events));
        let (machine, registry) = machine_with(presentation);
        let video = LoggedResource::new("video-1", Arc::clone(&events));
        registry.register(video.clone());

        let p = StatusPayload {
            timeout_minutes: 42,
            ..payload(true)
        };
        machine.transition(Mode::Active, p).await;

        assert_eq!(machine.mode(), Mode::Active);
        assert_eq!(machine.retained_payload().timeout_minutes, 42);
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(video.resume_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_entry_matches_active_effect_sequence() {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let presentation = FakePresentation::new(Arc::clone(&events));
        let (machine, registry) = machine_with(presentation);
        let video = LoggedResource::new("video-1", Arc::clone(&events));
        registry.register(video.clone());

        machine.transition(Mode::Inactive, payload(false)).await;
        let disabled = StatusPayload {
            disabled_flag: true,
            ..payload(false)
        };
        machine.transition(Mode::Disabled, disabled).await;

        assert_eq!(machine.mode(), Mode::Disabled);
        let log = events.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["pause:video-1", "show", "hide_begin", "hide_end", "resume:video-1"]
        );
    }
}
