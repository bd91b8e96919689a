//! Engine tuning knobs parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::time::Duration;

pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 10;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiet interval after the last debounced update before the coalesced
    /// patch is written to the remote store.
    pub debounce_quiet: Duration,
    /// Maximum number of items per remote call in `smart_batch_update`.
    pub batch_chunk_size: usize,
    /// Buffer size of the cache change-notification channel.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_quiet: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            batch_chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Build config from environment variables, falling back to defaults.
    ///
    /// - `SYNC_DEBOUNCE_MS`: default 100
    /// - `SYNC_BATCH_CHUNK_SIZE`: default 10, clamped to at least 1
    /// - `SYNC_EVENT_CAPACITY`: default 256, clamped to at least 1
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            debounce_quiet: Duration::from_millis(env_parse("SYNC_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS)),
            batch_chunk_size: env_parse("SYNC_BATCH_CHUNK_SIZE", DEFAULT_BATCH_CHUNK_SIZE).max(1),
            event_capacity: env_parse("SYNC_EVENT_CAPACITY", DEFAULT_EVENT_CAPACITY).max(1),
        }
    }

    #[must_use]
    pub fn with_debounce_quiet(mut self, quiet: Duration) -> Self {
        self.debounce_quiet = quiet;
        self
    }

    #[must_use]
    pub fn with_batch_chunk_size(mut self, size: usize) -> Self {
        self.batch_chunk_size = size.max(1);
        self
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
