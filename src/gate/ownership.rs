//! Pause/resume ownership ledger.
//!
//! Records which media resources this agent paused so that only those are
//! ever resumed. A resource paused by someone else stays untouched even if
//! it is in the paused condition when the gate lifts.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::ResourceEffectError;
use crate::gate::registry::ResourceRegistry;
use crate::types::ResourceId;

/// A pausable media-like resource inside a host document.
///
/// `pause` and `resume` may suspend and may fail per resource; failures are
/// isolated by the caller and never abort a transition.
#[async_trait]
pub trait MediaResource: Send + Sync {
    fn id(&self) -> ResourceId;
    fn is_paused(&self) -> bool;
    async fn pause(&self) -> Result<(), ResourceEffectError>;
    async fn resume(&self) -> Result<(), ResourceEffectError>;
}

/// Tracks which resources this agent paused.
///
/// Invariant: a resource is resumed by this agent iff it is currently in the
/// ownership set and currently paused; membership is dropped before the
/// resume attempt, regardless of the attempt's outcome.
pub struct OwnershipTracker {
    registry: Arc<ResourceRegistry>,
    owned: Mutex<HashSet<ResourceId>>,
    watching: AtomicBool,
}

impl OwnershipTracker {
    /// Create a tracker wired to a registry. The registry calls back into
    /// the tracker when resources appear or are removed.
    pub fn new(registry: Arc<ResourceRegistry>) -> Arc<Self> {
        let tracker = Arc::new(Self {
            registry: Arc::clone(&registry),
            owned: Mutex::new(HashSet::new()),
            watching: AtomicBool::new(false),
        });
        registry.set_watcher(Arc::downgrade(&tracker));
        tracker
    }

    /// Pause every currently-unpaused resource and take ownership of it.
    /// Returns the number of resources affected.
    pub async fn pause_all(&self) -> usize {
        let mut affected = 0;
        for resource in self.registry.snapshot() {
            if resource.is_paused() {
                continue;
            }
            let id = resource.id();
            match resource.pause().await {
                Ok(()) => {
                    self.owned.lock().unwrap().insert(id.clone());
                    debug!(resource = %id, "Paused resource");
                    affected += 1;
                }
                Err(e) => {
                    warn!(resource = %id, error = %e, "Failed to pause resource");
                }
            }
        }
        affected
    }

    /// Resume every owned resource that is still paused, dropping ownership
    /// of all of them. Owned resources that are no longer paused (someone
    /// else resumed them) are forgotten without a resume call. Returns the
    /// number of resources resumed.
    pub async fn resume_owned(&self) -> usize {
        let owned: Vec<ResourceId> = {
            let mut set = self.owned.lock().unwrap();
            set.drain().collect()
        };

        let mut affected = 0;
        for id in owned {
            let Some(resource) = self.registry.get(&id) else {
                debug!(resource = %id, "Owned resource no longer registered");
                continue;
            };
            if !resource.is_paused() {
                debug!(resource = %id, "Owned resource already resumed elsewhere");
                continue;
            }
            match resource.resume().await {
                Ok(()) => {
                    debug!(resource = %id, "Resumed resource");
                    affected += 1;
                }
                Err(e) => {
                    warn!(resource = %id, error = %e, "Failed to resume resource");
                }
            }
        }
        affected
    }

    /// Start watching for appearing resources, pausing them on sight, and
    /// immediately pause everything currently registered. Idempotent: a
    /// second start while already watching is a no-op. Returns the number
    /// of resources paused by the immediate sweep.
    pub async fn watch_start(&self) -> usize {
        if self.watching.swap(true, Ordering::SeqCst) {
            debug!("Ownership watch already started");
            return 0;
        }
        debug!("Ownership watch started");
        self.pause_all().await
    }

    /// Stop watching. Idempotent; never resumes anything.
    pub fn watch_stop(&self) {
        if self.watching.swap(false, Ordering::SeqCst) {
            debug!("Ownership watch stopped");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    pub fn is_owned(&self, id: &ResourceId) -> bool {
        self.owned.lock().unwrap().contains(id)
    }

    pub fn owned_count(&self) -> usize {
        self.owned.lock().unwrap().len()
    }

    /// Registry hook: a resource appeared (or replaced one with the same
    /// identity). Pauses it in the background while the watch is active;
    /// ownership is recorded only after the pause succeeds.
    ///
    /// The watch may stop between the spawn and the pause completing, so the
    /// flag is re-checked inside the task: before pausing, and again under
    /// the ownership lock before adopting. A pause that lands after the
    /// watch stopped is undone on the spot; nothing else would ever resume
    /// that resource.
    pub(crate) fn resource_appeared(self: Arc<Self>, resource: Arc<dyn MediaResource>) {
        if !self.watching.load(Ordering::SeqCst) {
            return;
        }
        tokio::spawn(async move {
            if !self.watching.load(Ordering::SeqCst) || resource.is_paused() {
                return;
            }
            let id = resource.id();
            match resource.pause().await {
                Ok(()) => {
                    let adopted = {
                        let mut owned = self.owned.lock().unwrap();
                        if self.watching.load(Ordering::SeqCst) {
                            owned.insert(id.clone());
                            true
                        } else {
                            false
                        }
                    };
                    if adopted {
                        debug!(resource = %id, "Paused newly appeared resource");
                    } else {
                        match resource.resume().await {
                            Ok(()) => {
                                debug!(resource = %id, "Undid pause after watch stop")
                            }
                            Err(e) => {
                                warn!(
                                    resource = %id,
                                    error = %e,
                                    "Failed to undo pause after watch stop"
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(resource = %id, error = %e, "Failed to pause appearing resource");
                }
            }
        });
    }

    /// Registry hook: a resource was removed; forget any ownership of it.
    pub(crate) fn resource_removed(&self, id: &ResourceId) {
        if self.owned.lock().unwrap().remove(id) {
            debug!(resource = %id, "Dropped ownership of removed resource");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    pub(crate) struct FakeResource {
        id: ResourceId,
        paused: AtomicBool,
        pause_calls: AtomicUsize,
        resume_calls: AtomicUsize,
        fail_pause: bool,
    }

    impl FakeResource {
        pub(crate) fn new(id: &str, paused: bool) -> Arc<Self> {
            Arc::new(Self {
                id: ResourceId::new(id),
                paused: AtomicBool::new(paused),
                pause_calls: AtomicUsize::new(0),
                resume_calls: AtomicUsize::new(0),
                fail_pause: false,
            })
        }

        fn failing_pause(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: ResourceId::new(id),
                paused: AtomicBool::new(false),
                pause_calls: AtomicUsize::new(0),
                resume_calls: AtomicUsize::new(0),
                fail_pause: true,
            })
        }

        pub(crate) fn pause_calls(&self) -> usize {
            self.pause_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn resume_calls(&self) -> usize {
            self.resume_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn set_paused(&self, paused: bool) {
            self.paused.store(paused, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MediaResource for FakeResource {
        fn id(&self) -> ResourceId {
            self.id.clone()
        }

        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }

        async fn pause(&self) -> Result<(), ResourceEffectError> {
            self.pause_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_pause {
                return Err(ResourceEffectError::InvalidState(self.id.clone()));
            }
            self.paused.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn resume(&self) -> Result<(), ResourceEffectError> {
            self.resume_calls.fetch_add(1, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Resource whose `pause` suspends until released, so tests can stop
    /// the watch while a pause is in flight.
    struct GatedResource {
        id: ResourceId,
        paused: AtomicBool,
        gate: tokio::sync::Notify,
        pause_started: tokio::sync::Notify,
        resume_calls: AtomicUsize,
    }

    impl GatedResource {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: ResourceId::new(id),
                paused: AtomicBool::new(false),
                gate: tokio::sync::Notify::new(),
                pause_started: tokio::sync::Notify::new(),
                resume_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MediaResource for GatedResource {
        fn id(&self) -> ResourceId {
            self.id.clone()
        }

        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }

        async fn pause(&self) -> Result<(), ResourceEffectError> {
            self.pause_started.notify_one();
            self.gate.notified().await;
            self.paused.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn resume(&self) -> Result<(), ResourceEffectError> {
            self.resume_calls.fetch_add(1, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup() -> (Arc<ResourceRegistry>, Arc<OwnershipTracker>) {
        let registry = Arc::new(ResourceRegistry::new());
        let tracker = OwnershipTracker::new(Arc::clone(&registry));
        (registry, tracker)
    }

    #[tokio::test]
    async fn pause_all_owns_only_what_it_paused() {
        let (registry, tracker) = setup();
        let playing = FakeResource::new("video-1", false);
        let already_paused = FakeResource::new("video-2", true);
        registry.register(playing.clone());
        registry.register(already_paused.clone());
        assert_eq!(registry.len(), 2);

        let affected = tracker.pause_all().await;

        assert_eq!(affected, 1);
        assert!(tracker.is_owned(&ResourceId::new("video-1")));
        assert!(!tracker.is_owned(&ResourceId::new("video-2")));
        assert_eq!(already_paused.pause_calls(), 0);
    }

    #[tokio::test]
    async fn resume_owned_never_touches_foreign_resources() {
        let (registry, tracker) = setup();
        let ours = FakeResource::new("video-1", false);
        let foreign = FakeResource::new("video-2", true);
        registry.register(ours.clone());
        registry.register(foreign.clone());

        tracker.pause_all().await;
        let affected = tracker.resume_owned().await;

        assert_eq!(affected, 1);
        assert_eq!(ours.resume_calls(), 1);
        assert_eq!(foreign.resume_calls(), 0);
    }

    #[tokio::test]
    async fn resume_owned_forgets_without_resume_when_already_resumed() {
        let (registry, tracker) = setup();
        let resource = FakeResource::new("video-1", false);
        registry.register(resource.clone());

        tracker.pause_all().await;
        // Someone else resumes it behind our back.
        resource.set_paused(false);

        let affected = tracker.resume_owned().await;

        assert_eq!(affected, 0);
        assert_eq!(resource.resume_calls(), 0);
        assert_eq!(tracker.owned_count(), 0);
    }

    #[tokio::test]
    async fn failed_pause_is_not_owned() {
        let (registry, tracker) = setup();
        let broken = FakeResource::failing_pause("video-1");
        registry.register(broken.clone());

        let affected = tracker.pause_all().await;

        assert_eq!(affected, 0);
        assert_eq!(tracker.owned_count(), 0);
        assert_eq!(broken.pause_calls(), 1);
    }

    #[tokio::test]
    async fn watch_start_is_idempotent() {
        let (registry, tracker) = setup();
        let resource = FakeResource::new("video-1", false);
        registry.register(resource.clone());

        let first = tracker.watch_start().await;
        let second = tracker.watch_start().await;

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(resource.pause_calls(), 1);

        tracker.watch_stop();
        tracker.watch_stop();
        assert!(!tracker.is_watching());
        // Stop never resumes.
        assert_eq!(resource.resume_calls(), 0);
    }

    #[tokio::test]
    async fn watch_pauses_appearing_resources() {
        let (registry, tracker) = setup();
        tracker.watch_start().await;

        let late = FakeResource::new("video-late", false);
        registry.register(late.clone());

        // Pause-on-appearance runs as a spawned task.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(late.pause_calls(), 1);
        assert!(tracker.is_owned(&ResourceId::new("video-late")));
    }

    #[tokio::test]
    async fn appearance_pause_is_undone_when_watch_stops_mid_flight() {
        let (registry, tracker) = setup();
        tracker.watch_start().await;

        let late = GatedResource::new("video-late");
        registry.register(late.clone());
        // The appearance task is now suspended inside pause().
        late.pause_started.notified().await;

        tracker.watch_stop();
        let resumed = tracker.resume_owned().await;
        assert_eq!(resumed, 0);

        // Let the in-flight pause complete; it must be undone, not adopted.
        late.gate.notify_one();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(!late.is_paused());
        assert_eq!(late.resume_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.owned_count(), 0);
    }

    #[tokio::test]
    async fn appearance_task_scheduled_after_watch_stop_does_nothing() {
        let (registry, tracker) = setup();
        tracker.watch_start().await;

        let late = FakeResource::new("video-late", false);
        registry.register(late.clone());
        // Stop before the spawned task gets a chance to run.
        tracker.watch_stop();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(late.pause_calls(), 0);
        assert!(!late.is_paused());
        assert_eq!(tracker.owned_count(), 0);
    }

    #[tokio::test]
    async fn appearance_is_ignored_when_not_watching() {
        let (registry, tracker) = setup();
        let resource = FakeResource::new("video-1", false);
        registry.register(resource.clone());

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(resource.pause_calls(), 0);
        assert_eq!(tracker.owned_count(), 0);
    }

    #[tokio::test]
    async fn removal_hook_drops_ownership() {
        let (registry, tracker) = setup();
        let resource = FakeResource::new("video-1", false);
        registry.register(resource.clone());
        tracker.pause_all().await;
        assert!(tracker.is_owned(&ResourceId::new("video-1")));

        registry.unregister(&ResourceId::new("video-1"));

        assert!(registry.is_empty());
        assert!(!tracker.is_owned(&ResourceId::new("video-1")));
        let affected = tracker.resume_owned().await;
        assert_eq!(affected, 0);
        assert_eq!(resource.resume_calls(), 0);
    }
}
