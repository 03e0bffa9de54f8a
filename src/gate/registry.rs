//! Resource registry keyed by stable identity.
//!
//! Explicit replacement for the source environment's weak-collection
//! membership: hosts register resources as they appear and unregister them
//! when they detach, and the registry forwards both events to the ownership
//! tracker so pause-on-appearance and ownership cleanup stay correct.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

use crate::gate::ownership::{MediaResource, OwnershipTracker};
use crate::types::ResourceId;

/// Directory of currently reachable media resources for one document.
pub struct ResourceRegistry {
    resources: Mutex<HashMap<ResourceId, Arc<dyn MediaResource>>>,
    watcher: Mutex<Option<Weak<OwnershipTracker>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
            watcher: Mutex::new(None),
        }
    }

    /// Register a resource. Re-registering an existing identity replaces the
    /// entry and counts as a fresh appearance (a document may swap out its
    /// media element while keeping the same identity).
    pub fn register(&self, resource: Arc<dyn MediaResource>) {
        let id = resource.id();
        let replaced = self
            .resources
            .lock()
            .unwrap()
            .insert(id.clone(), Arc::clone(&resource))
            .is_some();
        debug!(resource = %id, replaced, "Resource registered");

        if let Some(tracker) = self.upgrade_watcher() {
            tracker.resource_appeared(resource);
        }
    }

    /// Unregister a resource that is no longer reachable.
    pub fn unregister(&self, id: &ResourceId) -> Option<Arc<dyn MediaResource>> {
        let removed = self.resources.lock().unwrap().remove(id);
        if removed.is_some() {
            debug!(resource = %id, "Resource unregistered");
            if let Some(tracker) = self.upgrade_watcher() {
                tracker.resource_removed(id);
            }
        }
        removed
    }

    pub fn get(&self, id: &ResourceId) -> Option<Arc<dyn MediaResource>> {
        self.resources.lock().unwrap().get(id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn MediaResource>> {
        self.resources.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.resources.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.lock().unwrap().is_empty()
    }

    pub(crate) fn set_watcher(&self, watcher: Weak<OwnershipTracker>) {
        *self.watcher.lock().unwrap() = Some(watcher);
    }

    fn upgrade_watcher(&self) -> Option<Arc<OwnershipTracker>> {
        self.watcher
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|weak| weak.upgrade())
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
