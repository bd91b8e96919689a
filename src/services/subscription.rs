//! Subscription service — one live snapshot subscription per canvas.
//!
//! DESIGN
//! ======
//! Every push replaces the cached list wholesale with the pushed snapshot.
//! Nothing is merged with optimistic or pending-debounce state, so a push can
//! overwrite an optimistic write the store has not confirmed yet; the next
//! push that includes the write restores it.
//!
//! LIFECYCLE
//! =========
//! Each subscription slot carries a token. The snapshot callback applies a
//! push only while the slot for its canvas still carries the token it was
//! created with, checked under the subscriptions lock. A torn-down or
//! replaced subscription therefore cannot write to the cache even if its
//! store keeps delivering. The callback holds the table weakly so a
//! subscription never keeps its own engine alive.
//!
//! Remote subscribe and teardown calls happen outside the lock, since a
//! store may deliver the initial snapshot synchronously from `subscribe`.

#[cfg(test)]
#[path = "subscription_test.rs"]
mod tests;

use std::sync::{Arc, PoisonError};

use tracing::{debug, info, trace, warn};

use crate::engine::{ActiveSubscription, SyncEngine};
use crate::keys::CanvasId;
use crate::remote::{RemoteError, SnapshotCallback};
use crate::services::debounce;

// =============================================================================
// SUBSCRIBE
// =============================================================================

/// Open the snapshot subscription for `canvas_id`, tearing down any
/// existing one first.
///
/// # Errors
///
/// Returns the store's error if the subscription cannot be opened; the
/// canvas is then left unsubscribed.
pub fn subscribe(engine: &SyncEngine, canvas_id: &CanvasId) -> Result<(), RemoteError> {
    let token = engine.next_sequence();
    let previous = engine.subscription_map().insert(
        canvas_id.clone(),
        ActiveSubscription { token, handle: None },
    );
    if let Some(previous) = previous {
        teardown(previous);
        debug!(%canvas_id, "previous subscription replaced");
    }

    let on_change = snapshot_callback(engine, canvas_id, token);
    let handle = match engine.remote.subscribe(canvas_id, on_change) {
        Ok(handle) => handle,
        Err(e) => {
            let mut subscriptions = engine.subscription_map();
            if subscriptions.get(canvas_id).is_some_and(|s| s.token == token) {
                subscriptions.remove(canvas_id);
            }
            warn!(%canvas_id, error = %e, "subscribe failed");
            return Err(e);
        }
    };

    let orphan = {
        let mut subscriptions = engine.subscription_map();
        match subscriptions.get_mut(canvas_id) {
            Some(slot) if slot.token == token => {
                slot.handle = Some(handle);
                None
            }
            _ => Some(handle),
        }
    };
    match orphan {
        // Unsubscribed or replaced while registering.
        Some(handle) => handle.unsubscribe(),
        None => info!(%canvas_id, token, "canvas subscribed"),
    }
    Ok(())
}

fn snapshot_callback(engine: &SyncEngine, canvas_id: &CanvasId, token: u64) -> SnapshotCallback {
    let subscriptions = Arc::downgrade(&engine.subscriptions);
    let cache = engine.cache.clone();
    let canvas_id = canvas_id.clone();
    Arc::new(move |records| {
        let Some(subscriptions) = subscriptions.upgrade() else {
            return;
        };
        let subscriptions = subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscriptions
            .get(&canvas_id)
            .is_some_and(|s| s.token == token)
        {
            trace!(%canvas_id, count = records.len(), "snapshot applied");
            cache.replace_all(&canvas_id, records);
        } else {
            trace!(%canvas_id, token, "stale snapshot ignored");
        }
    })
}

fn teardown(subscription: ActiveSubscription) {
    if let Some(handle) = subscription.handle {
        handle.unsubscribe();
    }
}

// =============================================================================
// UNSUBSCRIBE
// =============================================================================

/// Tear down the subscription for `canvas_id` and cancel its pending
/// debounced writes. Returns whether a subscription was active; calling it
/// with none active is a no-op.
pub fn unsubscribe(engine: &SyncEngine, canvas_id: &CanvasId) -> bool {
    let removed = engine.subscription_map().remove(canvas_id);
    let Some(subscription) = removed else {
        return false;
    };
    teardown(subscription);
    let cancelled = debounce::cancel_pending(engine, canvas_id);
    info!(%canvas_id, cancelled, "canvas unsubscribed");
    true
}

/// Tear down every subscription. Returns how many were active.
pub(crate) fn unsubscribe_all(engine: &SyncEngine) -> usize {
    let drained: Vec<(CanvasId, ActiveSubscription)> = engine.subscription_map().drain().collect();
    let count = drained.len();
    for (canvas_id, subscription) in drained {
        teardown(subscription);
        debounce::cancel_pending(engine, &canvas_id);
    }
    count
}

#[must_use]
pub fn is_subscribed(engine: &SyncEngine, canvas_id: &CanvasId) -> bool {
    engine.subscription_map().contains_key(canvas_id)
}

// =============================================================================
// REFRESH
// =============================================================================

/// Reload a canvas from the store, e.g. after invalidation when no
/// subscription is active. Returns the number of records loaded.
///
/// # Errors
///
/// Returns the store's error; the cache is left as it was.
pub async fn refresh(engine: &SyncEngine, canvas_id: &CanvasId) -> Result<usize, RemoteError> {
    let records = engine.remote.get_all(canvas_id).await?;
    let count = records.len();
    engine.cache.replace_all(canvas_id, records);
    debug!(%canvas_id, count, "canvas refreshed");
    Ok(count)
}
