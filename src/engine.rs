//! Sync engine — the explicit, constructible owner of all engine state.
//!
//! DESIGN
//! ======
//! `SyncEngine` is handed to every service function, the same way shared
//! application state is handed to request handlers. It owns the local cache,
//! an injected remote store, the pending-mutation map for debounced writes,
//! and the per-canvas subscription table. Clone is cheap: all fields are
//! `Arc`-wrapped, so background flush tasks hold their own clone.
//!
//! No lock in here is ever held across an `.await`.

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{CacheEvent, ObjectCache};
use crate::config::SyncConfig;
use crate::keys::{CanvasId, ObjectId, RecordKey};
use crate::model::{ObjectPatch, ObjectRecord, Touch};
use crate::remote::{RemoteStore, SubscriptionHandle};
use crate::services::{debounce, subscription};

// =============================================================================
// PENDING MUTATIONS
// =============================================================================

/// Coalesced debounced update waiting for its quiet interval to elapse.
pub struct PendingMutation {
    /// Cumulative patch; later fields win.
    pub patch: ObjectPatch,
    /// Stamp of the most recent contributing update.
    pub touch: Touch,
    /// Identifies the scheduled flush that owns this entry.
    pub generation: u64,
    /// Sleeping flush task; aborted when superseded or cancelled.
    pub flush: JoinHandle<()>,
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Live subscription slot for one canvas.
pub struct ActiveSubscription {
    /// Pushes carrying any other token are from a torn-down subscription.
    pub token: u64,
    /// `None` while the remote subscribe call is still registering.
    pub handle: Option<SubscriptionHandle>,
}

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) cache: ObjectCache,
    pub(crate) remote: Arc<dyn RemoteStore>,
    pub(crate) config: SyncConfig,
    pub(crate) pending: Arc<Mutex<HashMap<RecordKey, PendingMutation>>>,
    pub(crate) subscriptions: Arc<Mutex<HashMap<CanvasId, ActiveSubscription>>>,
    sequence: Arc<AtomicU64>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        Self {
            cache: ObjectCache::new(config.event_capacity),
            remote,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// Current cached list for a canvas, in insertion order.
    #[must_use]
    pub fn get_all(&self, canvas_id: &CanvasId) -> Vec<ObjectRecord> {
        self.cache.get_all(canvas_id)
    }

    #[must_use]
    pub fn get(&self, canvas_id: &CanvasId, object_id: ObjectId) -> Option<ObjectRecord> {
        self.cache.get(&RecordKey::new(canvas_id, object_id))
    }

    #[must_use]
    pub fn is_loaded(&self, canvas_id: &CanvasId) -> bool {
        self.cache.is_loaded(canvas_id)
    }

    /// Stream of cache changes for reactive consumers.
    #[must_use]
    pub fn watch(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.watch()
    }

    /// Tear down every subscription and cancel every pending debounced
    /// write without flushing it.
    pub fn shutdown(&self) {
        let subscriptions = subscription::unsubscribe_all(self);
        let cancelled = debounce::cancel_all(self);
        info!(subscriptions, cancelled, "sync engine shut down");
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn pending_map(&self) -> std::sync::MutexGuard<'_, HashMap<RecordKey, PendingMutation>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscription_map(&self) -> std::sync::MutexGuard<'_, HashMap<CanvasId, ActiveSubscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
