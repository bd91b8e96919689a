//! Object synchronization engine for the collaborative canvas.
//!
//! Keeps a local, instantly-readable view of each canvas's objects
//! consistent with an authoritative remote store. Mutations land in the
//! local cache synchronously and are written remotely afterwards; failed
//! writes are rolled back or invalidate the canvas. High-frequency updates
//! (drag, resize) are coalesced per object before they reach the store, and
//! push subscriptions replace the cached list with each authoritative
//! snapshot.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | [`SyncEngine`], the owner of all engine state |
//! | [`cache`] | Per-canvas record lists and change events |
//! | [`model`] | Object records, shape kinds, patches, validation |
//! | [`keys`] | Canvas, object, user, and record-key identifiers |
//! | [`remote`] | The [`RemoteStore`] seam and the in-memory store |
//! | [`services::object`] | Optimistic create/update/delete and batches |
//! | [`services::debounce`] | Per-object coalescing of rapid updates |
//! | [`services::chunk`] | Sequential chunking of large batch updates |
//! | [`services::subscription`] | One snapshot subscription per canvas |
//! | [`config`] | Environment-driven tunables |
//! | [`error`] | The [`ErrorCode`] trait shared by error enums |

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod model;
pub mod remote;
pub mod services;

pub use cache::{CacheEvent, ObjectCache};
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::ErrorCode;
pub use keys::{CanvasId, ObjectId, RecordKey, UserId};
pub use model::{NewObject, ObjectPatch, ObjectRecord, RecordUpdate, Shape, ShapeKind, ShapePatch};
pub use remote::memory::MemoryStore;
pub use remote::{RemoteError, RemoteStore, SubscriptionHandle};
pub use services::object::ObjectError;
