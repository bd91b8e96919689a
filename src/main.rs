//! Demo driver — exercises the sync engine against a laggy in-memory store.
//!
//! Two users create shapes concurrently, one drags a shape (coalesced into a
//! single write per quiet interval), then a large batch move is split into
//! sequential chunks. Tunables come from the environment (see `config`).

use std::sync::Arc;
use std::time::Duration;

use canvas_sync::services::{chunk, debounce, object, subscription};
use canvas_sync::{CanvasId, MemoryStore, NewObject, ObjectPatch, RecordUpdate, Shape, SyncConfig, SyncEngine, UserId};
use tracing::{debug, info};

const DRAG_STEPS: u32 = 20;
const DRAG_FRAME: Duration = Duration::from_millis(16);
const BATCH_SIZE: u32 = 25;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        debug!(error = %e, "no .env loaded");
    }
    tracing_subscriber::fmt::init();

    let config = SyncConfig::from_env();
    let store = MemoryStore::new().with_latency(Duration::from_millis(20), Duration::from_millis(30));
    let engine = SyncEngine::new(Arc::new(store.clone()), config);
    let canvas_id = CanvasId::new("demo");
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");

    let mut events = engine.watch();
    let watcher = tokio::spawn(async move {
        let mut seen = 0_u64;
        while let Ok(event) = events.recv().await {
            seen += 1;
            debug!(?event, seen, "cache changed");
        }
    });

    subscription::subscribe(&engine, &canvas_id)?;

    // Concurrent creates from two users.
    let shapes = [
        (&alice, NewObject::new(100.0, 100.0, Shape::rect(120.0, 80.0))),
        (&bob, NewObject::new(300.0, 120.0, Shape::circle(40.0))),
        (&alice, NewObject::new(200.0, 300.0, Shape::star(5, 20.0, 45.0)).with_rotation(15.0)),
        (&bob, NewObject::new(420.0, 260.0, Shape::text("hello", 24.0))),
    ];
    let creates = shapes
        .into_iter()
        .map(|(user, fields)| object::create_object(&engine, &canvas_id, fields, user));
    let mut created = Vec::new();
    for result in futures::future::join_all(creates).await {
        created.push(result?);
    }
    info!(count = created.len(), cached = engine.get_all(&canvas_id).len(), "shapes created");
    let [first, second, ..] = created.as_slice() else {
        return Err("expected at least two created shapes".into());
    };

    // Drag the first shape; writes coalesce per quiet interval.
    let dragged = first.id;
    for step in 1..=DRAG_STEPS {
        let offset = f64::from(step) * 5.0;
        debounce::debounced_update(&engine, &canvas_id, dragged, ObjectPatch::position(100.0 + offset, 100.0), &alice)?;
        tokio::time::sleep(DRAG_FRAME).await;
    }
    let flushed = debounce::flush_pending(&engine, &canvas_id).await?;
    info!(steps = DRAG_STEPS, flushed, "drag finished");

    // Large batch move, split into chunks.
    let dots = (0..BATCH_SIZE)
        .map(|i| NewObject::new(f64::from(i) * 20.0, 500.0, Shape::circle(6.0)))
        .collect();
    let dots = object::batch_create(&engine, &canvas_id, dots, &bob).await?;
    let moves = dots
        .iter()
        .map(|r| RecordUpdate::new(r.id, ObjectPatch::position(r.x, r.y + 40.0)))
        .collect();
    chunk::smart_batch_update(&engine, &canvas_id, moves, &bob).await?;

    object::delete_object(&engine, &canvas_id, second.id).await?;

    if let Some(record) = engine.get(&canvas_id, dragged) {
        let json = serde_json::to_string(&record)?;
        info!(record = %json, "dragged record");
    }

    info!(
        cached = engine.get_all(&canvas_id).len(),
        remote = store.records(&canvas_id).len(),
        remote_calls = store.calls().len(),
        "demo complete"
    );

    engine.shutdown();
    watcher.abort();
    Ok(())
}
