//! Engine services: the operations callers invoke on a [`SyncEngine`].
//!
//! ARCHITECTURE
//! ============
//! Each module owns one concern and takes the engine by reference, so UI
//! actions and programmatic callers share exactly the same entry points.
//!
//! [`SyncEngine`]: crate::engine::SyncEngine

pub mod chunk;
pub mod debounce;
pub mod object;
pub mod subscription;
