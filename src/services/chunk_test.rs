use super::*;
use crate::config::SyncConfig;
use crate::engine::test_helpers::{canvas, dummy_record, seed_both, test_engine, test_engine_with, user};
use crate::error::ErrorCode;
use crate::model::{ObjectPatch, ObjectRecord};
use crate::remote::RemoteError;
use crate::remote::memory::{RemoteCall, RemoteOp};

fn seeded(engine: &SyncEngine, store: &crate::remote::memory::MemoryStore, n: u32) -> Vec<ObjectRecord> {
    let records: Vec<ObjectRecord> = (0..n).map(|i| dummy_record(f64::from(i))).collect();
    seed_both(engine, store, records.clone());
    records
}

fn move_all(records: &[ObjectRecord], x: f64) -> Vec<RecordUpdate> {
    records
        .iter()
        .map(|r| RecordUpdate::new(r.id, ObjectPatch::position(x, r.y)))
        .collect()
}

fn batch_sizes(store: &crate::remote::memory::MemoryStore) -> Vec<usize> {
    store
        .calls_of(RemoteOp::BatchUpdate)
        .iter()
        .map(|call| match call {
            RemoteCall::BatchUpdate { updates, .. } => updates.len(),
            _ => 0,
        })
        .collect()
}

#[test]
fn chunked_preserves_order_and_bounds() {
    let chunks = chunked((1..=7).collect::<Vec<_>>(), 3);
    assert_eq!(chunks, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
}

#[test]
fn chunked_handles_exact_multiple_and_empty() {
    assert_eq!(chunked(vec![1, 2, 3, 4], 2), vec![vec![1, 2], vec![3, 4]]);
    assert!(chunked(Vec::<u8>::new(), 5).is_empty());
}

#[test]
fn chunked_treats_zero_size_as_one() {
    assert_eq!(chunked(vec!['a', 'b'], 0), vec![vec!['a'], vec!['b']]);
}

#[tokio::test]
async fn at_threshold_is_a_single_batch() {
    let (engine, store) = test_engine();
    let records = seeded(&engine, &store, 10);

    smart_batch_update(&engine, &canvas(), move_all(&records, 100.0), &user())
        .await
        .unwrap();
    assert_eq!(batch_sizes(&store), vec![10]);
}

#[tokio::test]
async fn oversized_batch_runs_in_sequential_chunks() {
    let (engine, store) = test_engine();
    let records = seeded(&engine, &store, 25);

    smart_batch_update(&engine, &canvas(), move_all(&records, 100.0), &user())
        .await
        .unwrap();

    assert_eq!(batch_sizes(&store), vec![10, 10, 5]);
    assert!(engine.get_all(&canvas()).iter().all(|r| r.x == 100.0));
    assert!(store.records(&canvas()).iter().all(|r| r.x == 100.0));
}

#[tokio::test]
async fn failed_chunk_keeps_earlier_chunks_and_skips_later_ones() {
    let (engine, store) = test_engine();
    let records = seeded(&engine, &store, 25);
    store.fail_nth(RemoteOp::BatchUpdate, 2, RemoteError::Unavailable("offline".into()));

    let err = smart_batch_update(&engine, &canvas(), move_all(&records, 100.0), &user())
        .await
        .unwrap_err();

    match &err {
        ObjectError::PartialBatch { committed_chunks, failed_chunk, source } => {
            assert_eq!((*committed_chunks, *failed_chunk), (1, 2));
            assert!(matches!(**source, ObjectError::RemoteWrite(RemoteError::Unavailable(_))));
        }
        other => panic!("expected partial batch, got {other:?}"),
    }
    assert_eq!(err.error_code(), "E_PARTIAL_BATCH");
    assert!(err.retryable());
    assert_eq!(batch_sizes(&store), vec![10, 10]);

    let cached = engine.get_all(&canvas());
    assert!(cached[..10].iter().all(|r| r.x == 100.0));
    assert_eq!(&cached[10..], &records[10..]);

    let remote = store.records(&canvas());
    assert!(remote[..10].iter().all(|r| r.x == 100.0));
    assert_eq!(&remote[10..], &records[10..]);
}

#[tokio::test]
async fn invalid_patch_anywhere_writes_nothing() {
    let (engine, store) = test_engine();
    let records = seeded(&engine, &store, 15);
    let mut updates = move_all(&records, 100.0);
    updates[12].patch = ObjectPatch::position(f64::INFINITY, 0.0);

    assert!(matches!(
        smart_batch_update(&engine, &canvas(), updates, &user()).await,
        Err(ObjectError::Invalid(_))
    ));
    assert!(store.calls().is_empty());
    assert_eq!(engine.get_all(&canvas()), records);
}

#[tokio::test]
async fn threshold_comes_from_config() {
    let (engine, store) = test_engine_with(SyncConfig::default().with_batch_chunk_size(4));
    let records = seeded(&engine, &store, 9);

    smart_batch_update(&engine, &canvas(), move_all(&records, 1.0), &user())
        .await
        .unwrap();
    assert_eq!(batch_sizes(&store), vec![4, 4, 1]);
}
