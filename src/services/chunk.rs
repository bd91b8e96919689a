//! Batch chunker — split oversized batch updates into sequential sub-batches.
//!
//! DESIGN
//! ======
//! At or below the configured chunk size the request is one `batch_update`.
//! Above it, consecutive chunks of at most that size run one after another:
//! chunk k+1 is issued only after chunk k has settled.
//!
//! A failed chunk rolls back only its own optimistic change (through
//! `batch_update`) and stops the run. Earlier chunks stay committed both
//! remotely and in the cache; later chunks are never attempted. Callers see
//! exactly where the run stopped through `ObjectError::PartialBatch`.

#[cfg(test)]
#[path = "chunk_test.rs"]
mod tests;

use tracing::{debug, warn};

use crate::engine::SyncEngine;
use crate::keys::{CanvasId, UserId};
use crate::model::RecordUpdate;
use crate::services::object::{self, ObjectError};

/// Split `items` into consecutive chunks of at most `size` (minimum 1),
/// preserving order.
#[must_use]
pub fn chunked<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Batch update that stays within the remote store's per-call limit.
///
/// # Errors
///
/// `Invalid` if any patch fails validation (nothing is written). When a
/// single batch suffices, its error is returned as-is. Otherwise a failing
/// chunk yields `PartialBatch` naming the 1-based chunk that failed and how
/// many chunks before it were committed.
pub async fn smart_batch_update(
    engine: &SyncEngine,
    canvas_id: &CanvasId,
    updates: Vec<RecordUpdate>,
    user_id: &UserId,
) -> Result<(), ObjectError> {
    for update in &updates {
        update.patch.validate()?;
    }
    let threshold = engine.config.batch_chunk_size.max(1);
    if updates.len() <= threshold {
        return object::batch_update(engine, canvas_id, updates, user_id).await;
    }

    let chunks = chunked(updates, threshold);
    let total = chunks.len();
    debug!(%canvas_id, chunks = total, threshold, "splitting batch update");

    for (index, chunk) in chunks.into_iter().enumerate() {
        if let Err(e) = object::batch_update(engine, canvas_id, chunk, user_id).await {
            warn!(
                %canvas_id,
                failed_chunk = index + 1,
                committed_chunks = index,
                skipped_chunks = total - index - 1,
                error = %e,
                "chunked batch update stopped"
            );
            return Err(ObjectError::PartialBatch {
                committed_chunks: index,
                failed_chunk: index + 1,
                source: Box::new(e),
            });
        }
    }
    Ok(())
}
