//! Canvas and object identifiers plus canonical key derivation.
//!
//! DESIGN
//! ======
//! The cache, the debounce map, and any external invalidation call address
//! records through the same [`RecordKey`]. `Display` on the key types is the
//! one place the string form is derived, so every consumer agrees on it.

#[cfg(test)]
#[path = "keys_test.rs"]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier that partitions the cache and all remote operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanvasId(String);

impl CanvasId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanvasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CanvasId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CanvasId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Unique identifier of one object within a canvas.
///
/// Generated ids are `UUIDv7`: a millisecond timestamp prefix followed by
/// random bits, so concurrent creators on different clients do not collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Generate a fresh time-ordered id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Composite key addressing one record: `(canvas_id, object_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub canvas_id: CanvasId,
    pub object_id: ObjectId,
}

impl RecordKey {
    /// The single canonical key derivation for per-record lookups.
    #[must_use]
    pub fn new(canvas_id: &CanvasId, object_id: ObjectId) -> Self {
        Self { canvas_id: canvas_id.clone(), object_id }
    }

    /// Key of the list-level cache entry this record lives in.
    #[must_use]
    pub fn list_key(&self) -> ListKey {
        ListKey(self.canvas_id.clone())
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "canvas/{}/objects/{}", self.canvas_id, self.object_id)
    }
}

/// Key of a canvas-wide list entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey(pub CanvasId);

impl fmt::Display for ListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "canvas/{}/objects", self.0)
    }
}

/// Acting user recorded in `created_by` / `updated_by`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
