//! Debounce service — coalesce rapid updates to one object into one write.
//!
//! DESIGN
//! ======
//! `debounced_update` applies the optimistic merge to the cache right away,
//! then folds the patch into the pending entry for its `(canvas, object)`
//! key and re-arms that key's flush timer. When the quiet interval passes
//! without another update, the cumulative patch is written in one remote
//! call. At most one flush is scheduled per key at any time.
//!
//! Each pending entry owns the `JoinHandle` of its sleeping flush task and a
//! generation number. Superseding an entry aborts the old task; a flush
//! task only proceeds if the entry it finds still carries its generation,
//! and it removes that entry before issuing remote I/O. So a superseded
//! task never writes, and a write already in flight is never aborted.
//!
//! ERROR HANDLING
//! ==============
//! A failed flush invalidates the whole canvas cache, same as a plain
//! update. Background flushes have no caller to return to, so the failure
//! is logged and surfaces to readers as a `CacheEvent::Invalidated`.

#[cfg(test)]
#[path = "debounce_test.rs"]
mod tests;

use tracing::{debug, error, info};

use crate::engine::{PendingMutation, SyncEngine};
use crate::keys::{CanvasId, ObjectId, RecordKey, UserId};
use crate::model::{ObjectPatch, ObjectRecord, Touch};
use crate::services::object::{self, ObjectError};

// =============================================================================
// SCHEDULE
// =============================================================================

/// Apply `patch` optimistically now; write it (coalesced) after the quiet
/// interval. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// `Invalid` if the patch fails validation; nothing is cached or scheduled.
pub fn debounced_update(
    engine: &SyncEngine,
    canvas_id: &CanvasId,
    object_id: ObjectId,
    patch: ObjectPatch,
    user_id: &UserId,
) -> Result<Option<ObjectRecord>, ObjectError> {
    patch.validate()?;
    let touch = Touch::now(user_id);
    let patched = object::apply_optimistic(engine, canvas_id, object_id, &patch, &touch)?;

    let key = RecordKey::new(canvas_id, object_id);
    let generation = engine.next_sequence();
    let mut pending = engine.pending_map();
    let merged = match pending.remove(&key) {
        Some(previous) => {
            previous.flush.abort();
            let mut cumulative = previous.patch;
            cumulative.merge(patch);
            cumulative
        }
        None => patch,
    };
    let flush = schedule_flush(engine.clone(), key.clone(), generation);
    debug!(%key, generation, "debounced flush scheduled");
    pending.insert(key, PendingMutation { patch: merged, touch, generation, flush });
    Ok(patched)
}

fn schedule_flush(engine: SyncEngine, key: RecordKey, generation: u64) -> tokio::task::JoinHandle<()> {
    let quiet = engine.config.debounce_quiet;
    tokio::spawn(async move {
        tokio::time::sleep(quiet).await;
        let Some(entry) = take_if_current(&engine, &key, generation) else {
            return;
        };
        if let Err(e) = write_pending(&engine, &key, entry).await {
            error!(%key, error = %e, "debounced flush failed");
        }
    })
}

/// Remove the entry for `key` only if it still belongs to `generation`.
fn take_if_current(engine: &SyncEngine, key: &RecordKey, generation: u64) -> Option<PendingMutation> {
    let mut pending = engine.pending_map();
    match pending.get(key) {
        Some(entry) if entry.generation == generation => pending.remove(key),
        _ => None,
    }
}

async fn write_pending(engine: &SyncEngine, key: &RecordKey, entry: PendingMutation) -> Result<(), ObjectError> {
    let result = engine
        .remote
        .update_record(&key.canvas_id, key.object_id, &entry.patch, &entry.touch)
        .await;
    match result {
        Ok(()) => {
            debug!(%key, "debounced flush committed");
            Ok(())
        }
        Err(e) => {
            engine.cache.invalidate(&key.canvas_id);
            Err(e.into())
        }
    }
}

// =============================================================================
// FLUSH NOW
// =============================================================================

/// Write every pending entry for `canvas_id` immediately (e.g. at drag end)
/// instead of waiting for the quiet interval. Returns how many were written.
///
/// # Errors
///
/// Every entry is attempted; the first failure is returned afterwards.
pub async fn flush_pending(engine: &SyncEngine, canvas_id: &CanvasId) -> Result<usize, ObjectError> {
    let entries = drain(engine, |key| key.canvas_id == *canvas_id);
    let total = entries.len();
    let mut first_error = None;
    for (key, entry) in entries {
        entry.flush.abort();
        if let Err(e) = write_pending(engine, &key, entry).await {
            error!(%key, error = %e, "immediate flush failed");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(total),
    }
}

// =============================================================================
// CANCEL
// =============================================================================

/// Discard every pending entry for `canvas_id` without writing it.
pub fn cancel_pending(engine: &SyncEngine, canvas_id: &CanvasId) -> usize {
    let cancelled = abort_all(drain(engine, |key| key.canvas_id == *canvas_id));
    if cancelled > 0 {
        info!(%canvas_id, cancelled, "pending debounced writes cancelled");
    }
    cancelled
}

/// Discard every pending entry on every canvas without writing it.
pub fn cancel_all(engine: &SyncEngine) -> usize {
    abort_all(drain(engine, |_| true))
}

/// Pending write held back while its record is being deleted.
pub(crate) struct HeldWrite {
    key: RecordKey,
    patch: ObjectPatch,
    touch: Touch,
}

/// Take the pending entry for one key out of the map and stop its timer.
/// The write is returned so a failed delete can put it back with [`rearm`].
pub(crate) fn hold_key(engine: &SyncEngine, key: &RecordKey) -> Option<HeldWrite> {
    let entry = engine.pending_map().remove(key)?;
    entry.flush.abort();
    debug!(%key, "pending debounced write held");
    Some(HeldWrite { key: key.clone(), patch: entry.patch, touch: entry.touch })
}

/// Reschedule a held write with a fresh quiet interval. A newer update
/// queued for the same key in the meantime is merged on top of it.
pub(crate) fn rearm(engine: &SyncEngine, held: HeldWrite) {
    let HeldWrite { key, mut patch, mut touch } = held;
    let generation = engine.next_sequence();
    let mut pending = engine.pending_map();
    if let Some(newer) = pending.remove(&key) {
        newer.flush.abort();
        patch.merge(newer.patch);
        touch = newer.touch;
    }
    let flush = schedule_flush(engine.clone(), key.clone(), generation);
    debug!(%key, generation, "held debounced write rearmed");
    pending.insert(key, PendingMutation { patch, touch, generation, flush });
}

fn drain(engine: &SyncEngine, matches: impl Fn(&RecordKey) -> bool) -> Vec<(RecordKey, PendingMutation)> {
    let mut pending = engine.pending_map();
    let keys: Vec<RecordKey> = pending.keys().filter(|k| matches(k)).cloned().collect();
    keys.into_iter()
        .filter_map(|key| pending.remove(&key).map(|entry| (key, entry)))
        .collect()
}

fn abort_all(entries: Vec<(RecordKey, PendingMutation)>) -> usize {
    for (_, entry) in &entries {
        entry.flush.abort();
    }
    entries.len()
}

// =============================================================================
// INTROSPECTION
// =============================================================================

#[must_use]
pub fn pending_count(engine: &SyncEngine) -> usize {
    engine.pending_map().len()
}

/// Cumulative patch currently waiting for `key`, if any.
#[must_use]
pub fn pending_patch(engine: &SyncEngine, key: &RecordKey) -> Option<ObjectPatch> {
    engine.pending_map().get(key).map(|entry| entry.patch.clone())
}
