//! Object service — optimistic create, update, delete and their batch forms.
//!
//! DESIGN
//! ======
//! Every mutation writes the cache synchronously before the remote call is
//! issued, so readers see the change immediately. What happens when the
//! remote call fails depends on the operation:
//!
//! - create: remove exactly the optimistic record (by id), re-raise.
//! - delete: reinsert the captured record at its old index, re-raise.
//! - batch create/update/delete: restore the list captured just before the
//!   optimistic pass (whole-batch rollback), re-raise.
//! - update: invalidate the whole canvas so readers re-fetch, re-raise.
//!
//! Updates never attempt field-level rollback. Nothing here retries.
//!
//! A mutation aimed at an id the cache does not hold is a local no-op; the
//! remote call is still issued and may itself fail.

#[cfg(test)]
#[path = "object_test.rs"]
mod tests;

use tracing::{debug, warn};

use crate::cache::remove_by_id;
use crate::engine::SyncEngine;
use crate::error::ErrorCode;
use crate::keys::{CanvasId, ObjectId, RecordKey, UserId};
use crate::model::{NewObject, ObjectPatch, ObjectRecord, RecordUpdate, Touch, ValidationError};
use crate::remote::RemoteError;
use crate::services::debounce;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("object not found: {object_id} on canvas {canvas_id}")]
    NotFound { canvas_id: CanvasId, object_id: ObjectId },
    #[error("invalid object: {0}")]
    Invalid(#[from] ValidationError),
    #[error("remote write failed: {0}")]
    RemoteWrite(#[from] RemoteError),
    #[error("batch chunk {failed_chunk} failed after {committed_chunks} committed chunk(s): {source}")]
    PartialBatch { committed_chunks: usize, failed_chunk: usize, source: Box<ObjectError> },
}

impl ErrorCode for ObjectError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "E_OBJECT_NOT_FOUND",
            Self::Invalid(e) => e.error_code(),
            Self::RemoteWrite(_) => "E_REMOTE_WRITE",
            Self::PartialBatch { .. } => "E_PARTIAL_BATCH",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::RemoteWrite(e) => e.retryable(),
            Self::PartialBatch { source, .. } => source.retryable(),
            Self::NotFound { .. } | Self::Invalid(_) => false,
        }
    }
}

// =============================================================================
// CREATE
// =============================================================================

/// Create an object: stamp it, append it to the cache, then write it remotely.
///
/// # Errors
///
/// `Invalid` if `fields` fail validation (nothing is written), or
/// `RemoteWrite` after the optimistic record has been rolled back.
pub async fn create_object(
    engine: &SyncEngine,
    canvas_id: &CanvasId,
    fields: NewObject,
    user_id: &UserId,
) -> Result<ObjectRecord, ObjectError> {
    fields.validate()?;
    let touch = Touch::now(user_id);
    let record = ObjectRecord::from_new(fresh_id(engine, canvas_id), fields, &touch);
    let id = record.id;

    engine
        .cache
        .mutate(canvas_id, |list| list.push(record.clone()));
    debug!(%canvas_id, object_id = %id, kind = %record.kind(), "optimistic create applied");

    if let Err(e) = engine.remote.create_record(canvas_id, &record).await {
        engine.cache.mutate(canvas_id, |list| list.retain(|r| r.id != id));
        warn!(%canvas_id, object_id = %id, error = %e, "create failed; optimistic record rolled back");
        return Err(e.into());
    }
    Ok(record)
}

/// Generate an id not already present in the canvas cache.
fn fresh_id(engine: &SyncEngine, canvas_id: &CanvasId) -> ObjectId {
    loop {
        let id = ObjectId::generate();
        if !engine.cache.contains(canvas_id, id) {
            return id;
        }
    }
}

// =============================================================================
// UPDATE
// =============================================================================

/// Shallow-merge `patch` into the cached record, if present. Returns the
/// patched record, or `None` when the cache does not hold `object_id`; in
/// that case the cache is not touched and no event is emitted.
pub(crate) fn apply_optimistic(
    engine: &SyncEngine,
    canvas_id: &CanvasId,
    object_id: ObjectId,
    patch: &ObjectPatch,
    touch: &Touch,
) -> Result<Option<ObjectRecord>, ObjectError> {
    if !engine.cache.contains(canvas_id, object_id) {
        debug!(%canvas_id, %object_id, "update target not cached; local apply skipped");
        return Ok(None);
    }
    let patched = engine
        .cache
        .mutate(canvas_id, |list| -> Result<Option<ObjectRecord>, ValidationError> {
            let Some(record) = list.iter_mut().find(|r| r.id == object_id) else {
                return Ok(None);
            };
            record.apply_patch(patch, touch)?;
            Ok(Some(record.clone()))
        })?;
    Ok(patched)
}

/// Update an object optimistically, then write the same patch remotely.
///
/// Returns the optimistically patched record (`None` if it was not cached).
///
/// # Errors
///
/// `Invalid` before anything is written, or `RemoteWrite` after the whole
/// canvas has been invalidated.
pub async fn update_object(
    engine: &SyncEngine,
    canvas_id: &CanvasId,
    object_id: ObjectId,
    patch: ObjectPatch,
    user_id: &UserId,
) -> Result<Option<ObjectRecord>, ObjectError> {
    patch.validate()?;
    let touch = Touch::now(user_id);
    let patched = apply_optimistic(engine, canvas_id, object_id, &patch, &touch)?;

    if let Err(e) = engine
        .remote
        .update_record(canvas_id, object_id, &patch, &touch)
        .await
    {
        engine.cache.invalidate(canvas_id);
        warn!(%canvas_id, %object_id, error = %e, "update failed; canvas cache invalidated");
        return Err(e.into());
    }
    Ok(patched)
}

// =============================================================================
// DELETE
// =============================================================================

/// Delete an object optimistically. Any pending debounced write for it is
/// held back so it cannot resurrect the record remotely; it is dropped once
/// the delete commits and rescheduled if the delete fails.
///
/// # Errors
///
/// `RemoteWrite` after the captured record and its held write have been
/// restored.
pub async fn delete_object(engine: &SyncEngine, canvas_id: &CanvasId, object_id: ObjectId) -> Result<(), ObjectError> {
    let held = debounce::hold_key(engine, &RecordKey::new(canvas_id, object_id));
    let captured = engine
        .cache
        .mutate(canvas_id, |list| remove_by_id(list, object_id));

    if let Err(e) = engine.remote.delete_record(canvas_id, object_id).await {
        if let Some((index, record)) = captured {
            engine.cache.mutate(canvas_id, |list| {
                // EDGE: a snapshot may already have restored it.
                if !list.iter().any(|r| r.id == record.id) {
                    let at = index.min(list.len());
                    list.insert(at, record);
                }
            });
        }
        if let Some(held) = held {
            debounce::rearm(engine, held);
        }
        warn!(%canvas_id, %object_id, error = %e, "delete failed; record restored");
        return Err(e.into());
    }
    Ok(())
}

// =============================================================================
// BATCH
// =============================================================================

/// Create many objects in one optimistic pass and one remote call.
///
/// # Errors
///
/// `Invalid` if any item fails validation (nothing is written), or
/// `RemoteWrite` after the pre-batch list has been restored.
pub async fn batch_create(
    engine: &SyncEngine,
    canvas_id: &CanvasId,
    items: Vec<NewObject>,
    user_id: &UserId,
) -> Result<Vec<ObjectRecord>, ObjectError> {
    if items.is_empty() {
        return Ok(Vec::new());
    }
    for item in &items {
        item.validate()?;
    }
    let touch = Touch::now(user_id);
    let mut records = Vec::with_capacity(items.len());
    for fields in items {
        let mut id = fresh_id(engine, canvas_id);
        while records.iter().any(|r: &ObjectRecord| r.id == id) {
            id = fresh_id(engine, canvas_id);
        }
        records.push(ObjectRecord::from_new(id, fields, &touch));
    }

    let snapshot = engine.cache.snapshot(canvas_id);
    engine
        .cache
        .mutate(canvas_id, |list| list.extend(records.iter().cloned()));
    debug!(%canvas_id, count = records.len(), "optimistic batch create applied");

    if let Err(e) = engine.remote.batch_create(canvas_id, &records).await {
        engine.cache.restore(canvas_id, snapshot);
        warn!(%canvas_id, count = records.len(), error = %e, "batch create failed; batch rolled back");
        return Err(e.into());
    }
    Ok(records)
}

/// Update many objects in one optimistic pass and one remote call.
///
/// The optimistic pass is all-or-nothing: if any patch fails validation
/// against its cached record, the cache is left untouched.
///
/// # Errors
///
/// `Invalid` before anything is written, or `RemoteWrite` after the
/// pre-batch list has been restored.
pub async fn batch_update(
    engine: &SyncEngine,
    canvas_id: &CanvasId,
    updates: Vec<RecordUpdate>,
    user_id: &UserId,
) -> Result<(), ObjectError> {
    if updates.is_empty() {
        return Ok(());
    }
    for update in &updates {
        update.patch.validate()?;
    }
    let touch = Touch::now(user_id);

    let snapshot = engine.cache.snapshot(canvas_id);
    engine
        .cache
        .mutate(canvas_id, |list| -> Result<(), ValidationError> {
            let mut next = list.clone();
            for update in &updates {
                if let Some(record) = next.iter_mut().find(|r| r.id == update.id) {
                    record.apply_patch(&update.patch, &touch)?;
                }
            }
            *list = next;
            Ok(())
        })?;
    debug!(%canvas_id, count = updates.len(), "optimistic batch update applied");

    if let Err(e) = engine
        .remote
        .batch_update(canvas_id, &updates, &touch)
        .await
    {
        engine.cache.restore(canvas_id, snapshot);
        warn!(%canvas_id, count = updates.len(), error = %e, "batch update failed; batch rolled back");
        return Err(e.into());
    }
    Ok(())
}

/// Delete many objects in one optimistic pass and one remote call.
///
/// # Errors
///
/// `RemoteWrite` after the pre-batch list has been restored.
pub async fn batch_delete(engine: &SyncEngine, canvas_id: &CanvasId, ids: Vec<ObjectId>) -> Result<(), ObjectError> {
    if ids.is_empty() {
        return Ok(());
    }
    let held: Vec<_> = ids
        .iter()
        .filter_map(|id| debounce::hold_key(engine, &RecordKey::new(canvas_id, *id)))
        .collect();

    let snapshot = engine.cache.snapshot(canvas_id);
    engine
        .cache
        .mutate(canvas_id, |list| list.retain(|r| !ids.contains(&r.id)));
    debug!(%canvas_id, count = ids.len(), "optimistic batch delete applied");

    if let Err(e) = engine.remote.batch_delete(canvas_id, &ids).await {
        engine.cache.restore(canvas_id, snapshot);
        for write in held {
            debounce::rearm(engine, write);
        }
        warn!(%canvas_id, count = ids.len(), error = %e, "batch delete failed; batch rolled back");
        return Err(e.into());
    }
    Ok(())
}

// =============================================================================
// READ-THROUGH
// =============================================================================

/// Read one record straight from the remote store. Does not touch the cache.
///
/// # Errors
///
/// `NotFound` if the store has no such record, `RemoteWrite` if the read fails.
pub async fn fetch_object(
    engine: &SyncEngine,
    canvas_id: &CanvasId,
    object_id: ObjectId,
) -> Result<ObjectRecord, ObjectError> {
    engine
        .remote
        .get_record(canvas_id, object_id)
        .await?
        .ok_or_else(|| ObjectError::NotFound { canvas_id: canvas_id.clone(), object_id })
}
