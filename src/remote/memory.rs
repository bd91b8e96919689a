//! In-process remote store with snapshot push, latency, and fault injection.
//!
//! DESIGN
//! ======
//! `MemoryStore` behaves like a document database collection per canvas:
//! single and batch writes commit atomically, and after every committed
//! write each subscriber of that canvas receives the full snapshot. A new
//! subscriber immediately receives the current snapshot.
//!
//! Every call is recorded before it is attempted, so tests can assert on
//! what the engine issued even when the call fails. Faults are keyed on the
//! per-operation call count, which keeps failure placement deterministic.
//!
//! Deletes are idempotent: deleting a missing id succeeds. Updates of a
//! missing id fail with `NotFound`.

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, trace};

use super::{RemoteError, RemoteStore, SnapshotCallback, SubscriptionHandle};
use crate::keys::{CanvasId, ObjectId};
use crate::model::{ObjectPatch, ObjectRecord, RecordUpdate, Touch};

// =============================================================================
// CALL LOG + FAULTS
// =============================================================================

/// Operation names used for call counting and fault placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    CreateRecord,
    UpdateRecord,
    DeleteRecord,
    BatchCreate,
    BatchUpdate,
    BatchDelete,
    GetRecord,
    GetAll,
}

/// One call as received by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    CreateRecord { canvas_id: CanvasId, record: ObjectRecord },
    UpdateRecord { canvas_id: CanvasId, id: ObjectId, patch: ObjectPatch, touch: Touch },
    DeleteRecord { canvas_id: CanvasId, id: ObjectId },
    BatchCreate { canvas_id: CanvasId, records: Vec<ObjectRecord> },
    BatchUpdate { canvas_id: CanvasId, updates: Vec<RecordUpdate>, touch: Touch },
    BatchDelete { canvas_id: CanvasId, ids: Vec<ObjectId> },
    GetRecord { canvas_id: CanvasId, id: ObjectId },
    GetAll { canvas_id: CanvasId },
}

impl RemoteCall {
    #[must_use]
    pub fn op(&self) -> RemoteOp {
        match self {
            Self::CreateRecord { .. } => RemoteOp::CreateRecord,
            Self::UpdateRecord { .. } => RemoteOp::UpdateRecord,
            Self::DeleteRecord { .. } => RemoteOp::DeleteRecord,
            Self::BatchCreate { .. } => RemoteOp::BatchCreate,
            Self::BatchUpdate { .. } => RemoteOp::BatchUpdate,
            Self::BatchDelete { .. } => RemoteOp::BatchDelete,
            Self::GetRecord { .. } => RemoteOp::GetRecord,
            Self::GetAll { .. } => RemoteOp::GetAll,
        }
    }
}

#[derive(Debug, Clone)]
struct Fault {
    op: RemoteOp,
    /// 1-based call number to fail; `None` fails every call.
    on_call: Option<usize>,
    error: RemoteError,
}

#[derive(Debug, Clone, Copy, Default)]
struct Latency {
    base: Duration,
    jitter: Duration,
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Default)]
struct Inner {
    canvases: Mutex<HashMap<CanvasId, Vec<ObjectRecord>>>,
    subscribers: Mutex<HashMap<CanvasId, Vec<(u64, SnapshotCallback)>>>,
    next_subscriber: AtomicU64,
    calls: Mutex<Vec<RemoteCall>>,
    op_counts: Mutex<HashMap<RemoteOp, usize>>,
    faults: Mutex<Vec<Fault>>,
    latency: Mutex<Latency>,
}

/// Cloneable in-memory [`RemoteStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by `base` plus a uniform random `0..=jitter`.
    #[must_use]
    pub fn with_latency(self, base: Duration, jitter: Duration) -> Self {
        *lock(&self.inner.latency) = Latency { base, jitter };
        self
    }

    /// Fail the `n`th call (1-based, counted since creation) of `op`.
    pub fn fail_nth(&self, op: RemoteOp, n: usize, error: RemoteError) {
        lock(&self.inner.faults).push(Fault { op, on_call: Some(n), error });
    }

    /// Fail every call of `op` until [`MemoryStore::clear_faults`].
    pub fn fail_always(&self, op: RemoteOp, error: RemoteError) {
        lock(&self.inner.faults).push(Fault { op, on_call: None, error });
    }

    pub fn clear_faults(&self) {
        lock(&self.inner.faults).clear();
    }

    /// Every call received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.inner.calls).clone()
    }

    #[must_use]
    pub fn calls_of(&self, op: RemoteOp) -> Vec<RemoteCall> {
        lock(&self.inner.calls)
            .iter()
            .filter(|c| c.op() == op)
            .cloned()
            .collect()
    }

    /// Authoritative contents of a canvas.
    #[must_use]
    pub fn records(&self, canvas_id: &CanvasId) -> Vec<ObjectRecord> {
        lock(&self.inner.canvases)
            .get(canvas_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Overwrite a canvas without notifying subscribers.
    pub fn seed(&self, canvas_id: &CanvasId, records: Vec<ObjectRecord>) {
        lock(&self.inner.canvases).insert(canvas_id.clone(), records);
    }

    #[must_use]
    pub fn subscriber_count(&self, canvas_id: &CanvasId) -> usize {
        lock(&self.inner.subscribers)
            .get(canvas_id)
            .map_or(0, Vec::len)
    }

    /// Push the current snapshot to every subscriber of `canvas_id`.
    pub fn publish(&self, canvas_id: &CanvasId) {
        let snapshot = self.records(canvas_id);
        let callbacks: Vec<SnapshotCallback> = lock(&self.inner.subscribers)
            .get(canvas_id)
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        trace!(%canvas_id, subscribers = callbacks.len(), count = snapshot.len(), "publishing snapshot");
        for callback in callbacks {
            callback(snapshot.clone());
        }
    }

    /// Record the call, wait out simulated latency, then consult faults.
    async fn begin(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let op = call.op();
        let nth = {
            lock(&self.inner.calls).push(call);
            let mut counts = lock(&self.inner.op_counts);
            let count = counts.entry(op).or_insert(0);
            *count += 1;
            *count
        };

        let delay = {
            let latency = *lock(&self.inner.latency);
            let jitter_ms = u64::try_from(latency.jitter.as_millis()).unwrap_or(u64::MAX);
            let extra = if jitter_ms == 0 { 0 } else { rand::rng().random_range(0..=jitter_ms) };
            latency.base + Duration::from_millis(extra)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let faults = lock(&self.inner.faults);
        match faults
            .iter()
            .find(|f| f.op == op && f.on_call.is_none_or(|n| n == nth))
        {
            Some(fault) => {
                debug!(?op, nth, error = %fault.error, "injected remote fault");
                Err(fault.error.clone())
            }
            None => Ok(()),
        }
    }

    /// Run `write` against the canvas list; commit and publish on success.
    fn commit(
        &self,
        canvas_id: &CanvasId,
        write: impl FnOnce(&mut Vec<ObjectRecord>) -> Result<(), RemoteError>,
    ) -> Result<(), RemoteError> {
        {
            let mut canvases = lock(&self.inner.canvases);
            let mut next = canvases.get(canvas_id).cloned().unwrap_or_default();
            write(&mut next)?;
            canvases.insert(canvas_id.clone(), next);
        }
        self.publish(canvas_id);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn apply_update(list: &mut [ObjectRecord], id: ObjectId, patch: &ObjectPatch, touch: &Touch) -> Result<(), RemoteError> {
    let record = list
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or(RemoteError::NotFound(id))?;
    record
        .apply_patch(patch, touch)
        .map_err(|e| RemoteError::Rejected(e.to_string()))
}

#[async_trait::async_trait]
impl RemoteStore for MemoryStore {
    async fn create_record(&self, canvas_id: &CanvasId, record: &ObjectRecord) -> Result<(), RemoteError> {
        self.begin(RemoteCall::CreateRecord { canvas_id: canvas_id.clone(), record: record.clone() })
            .await?;
        self.commit(canvas_id, |list| {
            if list.iter().any(|r| r.id == record.id) {
                return Err(RemoteError::AlreadyExists(record.id));
            }
            list.push(record.clone());
            Ok(())
        })
    }

    async fn update_record(
        &self,
        canvas_id: &CanvasId,
        id: ObjectId,
        patch: &ObjectPatch,
        touch: &Touch,
    ) -> Result<(), RemoteError> {
        self.begin(RemoteCall::UpdateRecord {
            canvas_id: canvas_id.clone(),
            id,
            patch: patch.clone(),
            touch: touch.clone(),
        })
        .await?;
        self.commit(canvas_id, |list| apply_update(list, id, patch, touch))
    }

    async fn delete_record(&self, canvas_id: &CanvasId, id: ObjectId) -> Result<(), RemoteError> {
        self.begin(RemoteCall::DeleteRecord { canvas_id: canvas_id.clone(), id })
            .await?;
        self.commit(canvas_id, |list| {
            list.retain(|r| r.id != id);
            Ok(())
        })
    }

    async fn batch_create(&self, canvas_id: &CanvasId, records: &[ObjectRecord]) -> Result<(), RemoteError> {
        self.begin(RemoteCall::BatchCreate { canvas_id: canvas_id.clone(), records: records.to_vec() })
            .await?;
        self.commit(canvas_id, |list| {
            for record in records {
                if list.iter().any(|r| r.id == record.id) {
                    return Err(RemoteError::AlreadyExists(record.id));
                }
                list.push(record.clone());
            }
            Ok(())
        })
    }

    async fn batch_update(
        &self,
        canvas_id: &CanvasId,
        updates: &[RecordUpdate],
        touch: &Touch,
    ) -> Result<(), RemoteError> {
        self.begin(RemoteCall::BatchUpdate {
            canvas_id: canvas_id.clone(),
            updates: updates.to_vec(),
            touch: touch.clone(),
        })
        .await?;
        self.commit(canvas_id, |list| {
            updates
                .iter()
                .try_for_each(|u| apply_update(list, u.id, &u.patch, touch))
        })
    }

    async fn batch_delete(&self, canvas_id: &CanvasId, ids: &[ObjectId]) -> Result<(), RemoteError> {
        self.begin(RemoteCall::BatchDelete { canvas_id: canvas_id.clone(), ids: ids.to_vec() })
            .await?;
        self.commit(canvas_id, |list| {
            list.retain(|r| !ids.contains(&r.id));
            Ok(())
        })
    }

    async fn get_record(&self, canvas_id: &CanvasId, id: ObjectId) -> Result<Option<ObjectRecord>, RemoteError> {
        self.begin(RemoteCall::GetRecord { canvas_id: canvas_id.clone(), id })
            .await?;
        Ok(self.records(canvas_id).into_iter().find(|r| r.id == id))
    }

    async fn get_all(&self, canvas_id: &CanvasId) -> Result<Vec<ObjectRecord>, RemoteError> {
        self.begin(RemoteCall::GetAll { canvas_id: canvas_id.clone() })
            .await?;
        Ok(self.records(canvas_id))
    }

    fn subscribe(&self, canvas_id: &CanvasId, on_change: SnapshotCallback) -> Result<SubscriptionHandle, RemoteError> {
        let sub_id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.subscribers)
            .entry(canvas_id.clone())
            .or_default()
            .push((sub_id, Arc::clone(&on_change)));
        debug!(%canvas_id, sub_id, "remote subscription opened");

        // Initial snapshot, as a document-store listener would deliver.
        on_change(self.records(canvas_id));

        let inner = Arc::clone(&self.inner);
        let canvas_id = canvas_id.clone();
        Ok(SubscriptionHandle::new(move || {
            let mut subscribers = lock(&inner.subscribers);
            if let Some(subs) = subscribers.get_mut(&canvas_id) {
                subs.retain(|(id, _)| *id != sub_id);
                if subs.is_empty() {
                    subscribers.remove(&canvas_id);
                }
            }
            debug!(%canvas_id, sub_id, "remote subscription closed");
        }))
    }
}
