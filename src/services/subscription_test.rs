use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::config::SyncConfig;
use crate::engine::test_helpers::{canvas, dummy_record, seed_both, test_engine, user};
use crate::keys::ObjectId;
use crate::model::{ObjectPatch, ObjectRecord, RecordUpdate, Touch};
use crate::remote::memory::RemoteOp;
use crate::remote::{RemoteStore, SubscriptionHandle};
use crate::services::object::create_object;

// =============================================================================
// COUNTING STORE
// =============================================================================

/// Store that keeps every callback it was handed and counts teardowns per
/// subscription, so tests can push through stale callbacks.
#[derive(Default)]
struct CountingStore {
    callbacks: Mutex<Vec<SnapshotCallback>>,
    teardowns: Arc<Mutex<Vec<usize>>>,
    refuse: AtomicBool,
}

impl CountingStore {
    fn push(&self, index: usize, records: Vec<ObjectRecord>) {
        let callback = Arc::clone(&self.callbacks.lock().unwrap()[index]);
        callback(records);
    }

    fn teardowns(&self) -> Vec<usize> {
        self.teardowns.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStore for CountingStore {
    async fn create_record(&self, _: &CanvasId, _: &ObjectRecord) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn update_record(&self, _: &CanvasId, _: ObjectId, _: &ObjectPatch, _: &Touch) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn delete_record(&self, _: &CanvasId, _: ObjectId) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn batch_create(&self, _: &CanvasId, _: &[ObjectRecord]) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn batch_update(&self, _: &CanvasId, _: &[RecordUpdate], _: &Touch) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn batch_delete(&self, _: &CanvasId, _: &[ObjectId]) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn get_record(&self, _: &CanvasId, _: ObjectId) -> Result<Option<ObjectRecord>, RemoteError> {
        Ok(None)
    }

    async fn get_all(&self, _: &CanvasId) -> Result<Vec<ObjectRecord>, RemoteError> {
        Ok(Vec::new())
    }

    fn subscribe(&self, _: &CanvasId, on_change: SnapshotCallback) -> Result<SubscriptionHandle, RemoteError> {
        if self.refuse.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("listener refused".into()));
        }
        let index = {
            let mut callbacks = self.callbacks.lock().unwrap();
            callbacks.push(on_change);
            callbacks.len() - 1
        };
        self.teardowns.lock().unwrap().push(0);
        let teardowns = Arc::clone(&self.teardowns);
        Ok(SubscriptionHandle::new(move || {
            teardowns.lock().unwrap()[index] += 1;
        }))
    }
}

fn counting_engine() -> (SyncEngine, Arc<CountingStore>) {
    let store = Arc::new(CountingStore::default());
    let engine = SyncEngine::new(Arc::clone(&store) as Arc<dyn RemoteStore>, SyncConfig::default());
    (engine, store)
}

// =============================================================================
// SUBSCRIBE
// =============================================================================

#[tokio::test]
async fn subscribe_loads_initial_snapshot() {
    let (engine, store) = test_engine();
    let records = vec![dummy_record(1.0), dummy_record(2.0)];
    store.seed(&canvas(), records.clone());

    subscribe(&engine, &canvas()).unwrap();
    assert!(is_subscribed(&engine, &canvas()));
    assert_eq!(engine.get_all(&canvas()), records);
    assert_eq!(store.subscriber_count(&canvas()), 1);
}

#[tokio::test]
async fn resubscribe_tears_down_previous_exactly_once() {
    let (engine, store) = counting_engine();

    subscribe(&engine, &canvas()).unwrap();
    subscribe(&engine, &canvas()).unwrap();
    assert_eq!(store.teardowns(), vec![1, 0]);

    assert!(unsubscribe(&engine, &canvas()));
    assert_eq!(store.teardowns(), vec![1, 1]);
}

#[tokio::test]
async fn resubscribe_leaves_one_live_listener() {
    let (engine, store) = test_engine();
    subscribe(&engine, &canvas()).unwrap();
    subscribe(&engine, &canvas()).unwrap();
    assert_eq!(store.subscriber_count(&canvas()), 1);
}

#[tokio::test]
async fn stale_callback_cannot_write_cache() {
    let (engine, store) = counting_engine();
    subscribe(&engine, &canvas()).unwrap();
    subscribe(&engine, &canvas()).unwrap();

    store.push(0, vec![dummy_record(1.0)]);
    assert!(engine.get_all(&canvas()).is_empty());

    let fresh = vec![dummy_record(2.0)];
    store.push(1, fresh.clone());
    assert_eq!(engine.get_all(&canvas()), fresh);

    unsubscribe(&engine, &canvas());
    store.push(1, vec![dummy_record(3.0)]);
    assert_eq!(engine.get_all(&canvas()), fresh);
}

#[tokio::test]
async fn failed_subscribe_leaves_canvas_unsubscribed() {
    let (engine, store) = counting_engine();
    store.refuse.store(true, std::sync::atomic::Ordering::SeqCst);

    let err = subscribe(&engine, &canvas()).unwrap_err();
    assert!(matches!(err, RemoteError::Unavailable(_)));
    assert!(!is_subscribed(&engine, &canvas()));
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

#[tokio::test]
async fn snapshot_replaces_optimistic_state_wholesale() {
    let (engine, store) = test_engine();
    let authoritative = vec![dummy_record(1.0)];
    store.seed(&canvas(), authoritative.clone());
    subscribe(&engine, &canvas()).unwrap();

    let optimistic = dummy_record(9.0);
    engine
        .cache()
        .mutate(&canvas(), |list| list.push(optimistic.clone()));
    assert_eq!(engine.get_all(&canvas()).len(), 2);

    store.publish(&canvas());
    assert_eq!(engine.get_all(&canvas()), authoritative);
}

#[tokio::test]
async fn confirmed_writes_arrive_through_snapshots() {
    let (engine, store) = test_engine();
    subscribe(&engine, &canvas()).unwrap();

    let record = create_object(&engine, &canvas(), crate::engine::test_helpers::rect_at(5.0, 5.0), &user())
        .await
        .unwrap();
    assert_eq!(engine.get_all(&canvas()), vec![record.clone()]);
    assert_eq!(store.records(&canvas()), vec![record]);
}

#[tokio::test]
async fn snapshot_reloads_an_invalidated_canvas() {
    let (engine, store) = test_engine();
    let record = dummy_record(1.0);
    seed_both(&engine, &store, vec![record.clone()]);
    subscribe(&engine, &canvas()).unwrap();
    store.fail_nth(RemoteOp::UpdateRecord, 1, RemoteError::Unavailable("offline".into()));

    assert!(crate::services::object::update_object(&engine, &canvas(), record.id, ObjectPatch::position(3.0, 3.0), &user())
        .await
        .is_err());
    assert!(!engine.is_loaded(&canvas()));

    store.publish(&canvas());
    assert_eq!(engine.get_all(&canvas()), vec![record]);
}

// =============================================================================
// UNSUBSCRIBE
// =============================================================================

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let (engine, store) = test_engine();
    assert!(!unsubscribe(&engine, &canvas()));

    subscribe(&engine, &canvas()).unwrap();
    assert!(unsubscribe(&engine, &canvas()));
    assert!(!unsubscribe(&engine, &canvas()));
    assert_eq!(store.subscriber_count(&canvas()), 0);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_cancels_pending_debounced_writes() {
    let (engine, store) = test_engine();
    let record = dummy_record(1.0);
    seed_both(&engine, &store, vec![record.clone()]);
    subscribe(&engine, &canvas()).unwrap();

    debounce::debounced_update(&engine, &canvas(), record.id, ObjectPatch::position(8.0, 8.0), &user()).unwrap();
    assert!(unsubscribe(&engine, &canvas()));
    assert_eq!(debounce::pending_count(&engine), 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(store.calls_of(RemoteOp::UpdateRecord).is_empty());
}

#[tokio::test]
async fn dropping_engine_does_not_leak_through_callbacks() {
    let (engine, store) = test_engine();
    subscribe(&engine, &canvas()).unwrap();
    let weak = Arc::downgrade(&engine.subscriptions);
    drop(engine);

    assert!(weak.upgrade().is_none());
    assert_eq!(store.subscriber_count(&canvas()), 0);
    store.publish(&canvas());
}

// =============================================================================
// REFRESH
// =============================================================================

#[tokio::test]
async fn refresh_reloads_from_store() {
    let (engine, store) = test_engine();
    let records = vec![dummy_record(1.0), dummy_record(2.0), dummy_record(3.0)];
    store.seed(&canvas(), records.clone());
    assert!(!engine.is_loaded(&canvas()));

    assert_eq!(refresh(&engine, &canvas()).await.unwrap(), 3);
    assert_eq!(engine.get_all(&canvas()), records);
}

#[tokio::test]
async fn refresh_failure_leaves_cache_alone() {
    let (engine, store) = test_engine();
    let records = vec![dummy_record(1.0)];
    seed_both(&engine, &store, records.clone());
    store.fail_always(RemoteOp::GetAll, RemoteError::Unavailable("offline".into()));

    assert!(refresh(&engine, &canvas()).await.is_err());
    assert_eq!(engine.get_all(&canvas()), records);
}
