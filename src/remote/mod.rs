//! Remote store boundary — the authoritative collection of canvas objects.
//!
//! DESIGN
//! ======
//! `RemoteStore` is the only wire/storage seam the engine depends on;
//! transport and encoding are the implementor's concern. Writes are assumed
//! at-least-once. Subscriptions push complete authoritative snapshots, never
//! diffs. The engine holds the store as `Arc<dyn RemoteStore>` so tests and
//! embedders can inject their own.

pub mod memory;

use std::sync::Arc;

use crate::error::ErrorCode;
use crate::keys::{CanvasId, ObjectId};
use crate::model::{ObjectPatch, ObjectRecord, RecordUpdate, Touch};

// =============================================================================
// ERROR
// =============================================================================

/// Failure reported by a remote store operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("remote object not found: {0}")]
    NotFound(ObjectId),
    #[error("remote object already exists: {0}")]
    AlreadyExists(ObjectId),
    #[error("remote rejected write: {0}")]
    Rejected(String),
    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

impl ErrorCode for RemoteError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_REMOTE_NOT_FOUND",
            Self::AlreadyExists(_) => "E_REMOTE_ALREADY_EXISTS",
            Self::Rejected(_) => "E_REMOTE_REJECTED",
            Self::Unavailable(_) => "E_REMOTE_UNAVAILABLE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Receives every authoritative snapshot pushed for a canvas.
pub type SnapshotCallback = Arc<dyn Fn(Vec<ObjectRecord>) + Send + Sync>;

/// Live push subscription. Owns its teardown, which runs exactly once:
/// on [`SubscriptionHandle::unsubscribe`] or on drop, whichever comes first.
pub struct SubscriptionHandle {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self { teardown: Some(Box::new(teardown)) }
    }

    pub fn unsubscribe(mut self) {
        self.run_teardown();
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("live", &self.teardown.is_some())
            .finish()
    }
}

// =============================================================================
// STORE CONTRACT
// =============================================================================

/// Authoritative object store scoped by canvas.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_record(&self, canvas_id: &CanvasId, record: &ObjectRecord) -> Result<(), RemoteError>;

    /// Apply `patch` to one record and stamp it with `touch`.
    async fn update_record(
        &self,
        canvas_id: &CanvasId,
        id: ObjectId,
        patch: &ObjectPatch,
        touch: &Touch,
    ) -> Result<(), RemoteError>;

    async fn delete_record(&self, canvas_id: &CanvasId, id: ObjectId) -> Result<(), RemoteError>;

    /// Create all records atomically.
    async fn batch_create(&self, canvas_id: &CanvasId, records: &[ObjectRecord]) -> Result<(), RemoteError>;

    /// Apply all patches atomically, stamping each record with `touch`.
    async fn batch_update(&self, canvas_id: &CanvasId, updates: &[RecordUpdate], touch: &Touch)
    -> Result<(), RemoteError>;

    /// Delete all ids atomically.
    async fn batch_delete(&self, canvas_id: &CanvasId, ids: &[ObjectId]) -> Result<(), RemoteError>;

    async fn get_record(&self, canvas_id: &CanvasId, id: ObjectId) -> Result<Option<ObjectRecord>, RemoteError>;

    async fn get_all(&self, canvas_id: &CanvasId) -> Result<Vec<ObjectRecord>, RemoteError>;

    /// Register `on_change` for snapshot pushes on `canvas_id`. Dropping or
    /// unsubscribing the returned handle stops further pushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot open the subscription.
    fn subscribe(&self, canvas_id: &CanvasId, on_change: SnapshotCallback) -> Result<SubscriptionHandle, RemoteError>;
}
