//! Local object cache — per-canvas ordered record lists.
//!
//! DESIGN
//! ======
//! The cache is the single source every consumer reads. Writes are
//! synchronous: a read always observes the most recent `replace_all`,
//! `mutate`, or `invalidate`, with no staleness window. The lock is a std
//! `RwLock` and is never held across an `.await`.
//!
//! Every write is announced on a broadcast channel so reactive consumers
//! (renderers, query layers) can re-read without polling. A canvas that has
//! been invalidated (or never loaded) has no entry at all, which is distinct
//! from a loaded canvas with zero objects.

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::trace;

use crate::keys::{CanvasId, ListKey, ObjectId, RecordKey};
use crate::model::ObjectRecord;

/// Change notification emitted after every cache write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The canvas list was replaced wholesale (snapshot or rollback).
    Replaced(CanvasId),
    /// The canvas list was transformed in place (optimistic write).
    Mutated(CanvasId),
    /// The canvas entry was discarded; consumers must re-fetch.
    Invalidated(CanvasId),
}

impl CacheEvent {
    #[must_use]
    pub fn canvas_id(&self) -> &CanvasId {
        match self {
            Self::Replaced(id) | Self::Mutated(id) | Self::Invalidated(id) => id,
        }
    }
}

/// Shared, cloneable handle to the per-canvas record lists.
#[derive(Clone)]
pub struct ObjectCache {
    lists: Arc<RwLock<HashMap<CanvasId, Vec<ObjectRecord>>>>,
    events: broadcast::Sender<CacheEvent>,
}

impl ObjectCache {
    #[must_use]
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self { lists: Arc::new(RwLock::new(HashMap::new())), events }
    }

    /// Receive every subsequent cache change.
    #[must_use]
    pub fn watch(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Snapshot read of a canvas list. Empty if the canvas is not loaded.
    #[must_use]
    pub fn get_all(&self, canvas_id: &CanvasId) -> Vec<ObjectRecord> {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        lists.get(canvas_id).cloned().unwrap_or_default()
    }

    /// Snapshot read that distinguishes "not loaded" from "empty".
    #[must_use]
    pub fn snapshot(&self, canvas_id: &CanvasId) -> Option<Vec<ObjectRecord>> {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        lists.get(canvas_id).cloned()
    }

    /// Look up one record through the canonical record key.
    #[must_use]
    pub fn get(&self, key: &RecordKey) -> Option<ObjectRecord> {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        lists
            .get(&key.canvas_id)
            .and_then(|list| list.iter().find(|r| r.id == key.object_id))
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, canvas_id: &CanvasId, object_id: ObjectId) -> bool {
        self.get(&RecordKey::new(canvas_id, object_id)).is_some()
    }

    #[must_use]
    pub fn is_loaded(&self, canvas_id: &CanvasId) -> bool {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        lists.contains_key(canvas_id)
    }

    /// Overwrite the canvas list.
    pub fn replace_all(&self, canvas_id: &CanvasId, records: Vec<ObjectRecord>) {
        {
            let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
            lists.insert(canvas_id.clone(), records);
        }
        self.notify(CacheEvent::Replaced(canvas_id.clone()));
    }

    /// Put back a previously captured list. `None` means the canvas was not
    /// loaded at capture time, so the entry is dropped again.
    pub fn restore(&self, canvas_id: &CanvasId, snapshot: Option<Vec<ObjectRecord>>) {
        match snapshot {
            Some(records) => self.replace_all(canvas_id, records),
            None => self.invalidate(canvas_id),
        }
    }

    /// Apply a transform to the current list (empty if not loaded) and store
    /// the result. Returns whatever the transform returns.
    ///
    /// A transform that leaves an unloaded canvas empty does not load it.
    pub fn mutate<R>(&self, canvas_id: &CanvasId, transform: impl FnOnce(&mut Vec<ObjectRecord>) -> R) -> R {
        let out = {
            let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
            let existed = lists.contains_key(canvas_id);
            let list = lists.entry(canvas_id.clone()).or_default();
            let out = transform(list);
            let empty = list.is_empty();
            if !existed && empty {
                lists.remove(canvas_id);
            }
            out
        };
        self.notify(CacheEvent::Mutated(canvas_id.clone()));
        out
    }

    /// Discard the canvas entry entirely.
    pub fn invalidate(&self, canvas_id: &CanvasId) {
        {
            let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
            lists.remove(canvas_id);
        }
        trace!(key = %ListKey(canvas_id.clone()), "cache entry invalidated");
        self.notify(CacheEvent::Invalidated(canvas_id.clone()));
    }

    fn notify(&self, event: CacheEvent) {
        if self.events.send(event).is_err() {
            trace!("cache event dropped; no listeners");
        }
    }
}

/// Remove exactly the record with `id`, returning it and its former index.
pub(crate) fn remove_by_id(list: &mut Vec<ObjectRecord>, id: ObjectId) -> Option<(usize, ObjectRecord)> {
    let index = list.iter().position(|r| r.id == id)?;
    Some((index, list.remove(index)))
}
