//! Key-value cache abstraction consumed by the counter engine.

mod memory;

pub use memory::InMemoryCache;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Shared cache holding counter entries.
///
/// Implementations must be safe to call from many request handlers at once.
/// `create_if_absent` and `atomic_increment` are the only write paths, and
/// both must be atomic per key: the engine never performs its own
/// read-add-write.
#[async_trait]
pub trait CounterCache: Send + Sync {
    /// Current value of a live entry, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<u64>>;

    /// Insert `initial` with the given time to live unless a live entry exists.
    ///
    /// Returns `true` only for the caller whose insert took effect.
    async fn create_if_absent(&self, key: &str, initial: u64, ttl: Duration) -> Result<bool>;

    /// Add one to a live entry and return the new value without touching its expiry.
    ///
    /// Returns `None` when no live entry exists.
    async fn atomic_increment(&self, key: &str) -> Result<Option<u64>>;
}
