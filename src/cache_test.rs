use super::*;
use crate::keys::UserId;
use crate::model::{NewObject, Shape, Touch};

fn record(x: f64) -> ObjectRecord {
    let touch = Touch { at: 1, by: UserId::new("u1") };
    ObjectRecord::from_new(ObjectId::generate(), NewObject::new(x, 0.0, Shape::circle(4.0)), &touch)
}

#[test]
fn unloaded_canvas_reads_empty() {
    let cache = ObjectCache::new(8);
    let canvas = CanvasId::new("c1");
    assert!(cache.get_all(&canvas).is_empty());
    assert!(cache.snapshot(&canvas).is_none());
    assert!(!cache.is_loaded(&canvas));
}

#[test]
fn replace_all_is_immediately_visible() {
    let cache = ObjectCache::new(8);
    let canvas = CanvasId::new("c1");
    let records = vec![record(1.0), record(2.0)];
    cache.replace_all(&canvas, records.clone());
    assert_eq!(cache.get_all(&canvas), records);
    assert!(cache.is_loaded(&canvas));
}

#[test]
fn mutate_preserves_order_and_returns_value() {
    let cache = ObjectCache::new(8);
    let canvas = CanvasId::new("c1");
    let a = record(1.0);
    let b = record(2.0);
    cache.replace_all(&canvas, vec![a.clone()]);
    let len = cache.mutate(&canvas, |list| {
        list.push(b.clone());
        list.len()
    });
    assert_eq!(len, 2);
    assert_eq!(cache.get_all(&canvas), vec![a, b]);
}

#[test]
fn get_uses_record_key() {
    let cache = ObjectCache::new(8);
    let canvas = CanvasId::new("c1");
    let a = record(1.0);
    cache.replace_all(&canvas, vec![a.clone()]);
    assert_eq!(cache.get(&RecordKey::new(&canvas, a.id)), Some(a.clone()));
    assert!(cache.get(&RecordKey::new(&CanvasId::new("c2"), a.id)).is_none());
    assert!(cache.contains(&canvas, a.id));
}

#[test]
fn canvases_are_partitioned() {
    let cache = ObjectCache::new(8);
    cache.replace_all(&CanvasId::new("c1"), vec![record(1.0)]);
    cache.invalidate(&CanvasId::new("c2"));
    assert_eq!(cache.get_all(&CanvasId::new("c1")).len(), 1);
}

#[test]
fn invalidate_drops_entry() {
    let cache = ObjectCache::new(8);
    let canvas = CanvasId::new("c1");
    cache.replace_all(&canvas, vec![record(1.0)]);
    cache.invalidate(&canvas);
    assert!(!cache.is_loaded(&canvas));
    assert!(cache.get_all(&canvas).is_empty());
}

#[test]
fn restore_none_unloads_canvas() {
    let cache = ObjectCache::new(8);
    let canvas = CanvasId::new("c1");
    cache.mutate(&canvas, |list| list.push(record(1.0)));
    cache.restore(&canvas, None);
    assert!(!cache.is_loaded(&canvas));
}

#[test]
fn remove_by_id_reports_index() {
    let a = record(1.0);
    let b = record(2.0);
    let mut list = vec![a.clone(), b.clone()];
    let (index, removed) = remove_by_id(&mut list, b.id).unwrap();
    assert_eq!(index, 1);
    assert_eq!(removed, b);
    assert_eq!(list, vec![a]);
    assert!(remove_by_id(&mut list, b.id).is_none());
}

#[tokio::test]
async fn writes_are_broadcast() {
    let cache = ObjectCache::new(8);
    let canvas = CanvasId::new("c1");
    let mut rx = cache.watch();

    cache.replace_all(&canvas, Vec::new());
    cache.mutate(&canvas, |list| list.push(record(1.0)));
    cache.invalidate(&canvas);

    assert_eq!(rx.recv().await.unwrap(), CacheEvent::Replaced(canvas.clone()));
    assert_eq!(rx.recv().await.unwrap(), CacheEvent::Mutated(canvas.clone()));
    assert_eq!(rx.recv().await.unwrap(), CacheEvent::Invalidated(canvas.clone()));
}
