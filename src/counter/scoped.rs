//! Scoped counter engine.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::cache::CounterCache;
use crate::error::{CounterError, Result};

/// Separator between the scope and the caller's key.
pub const SCOPE_SEPARATOR: &str = "_";

/// Longest accepted window: one year.
pub const MAX_ENTRY_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// A family of fixed-window counters sharing one scope, TTL and limit.
///
/// Every logical key maps to one cache entry named `scope + "_" + key`. The
/// entry is created by the first increment with the configured time to live;
/// later increments never extend it, so the window resets only when the cache
/// evicts the entry.
///
/// The engine holds no mutable state of its own. Clones share the same cache
/// and can be used from any number of tasks at once.
#[derive(Clone)]
pub struct ScopedCounter {
    /// Scope with the separator already appended
    prefix: String,
    /// Window length
    entry_ttl: Duration,
    /// Count at which `increment_and_check` reports abuse
    upper_limit: u64,
    cache: Arc<dyn CounterCache>,
}

impl std::fmt::Debug for ScopedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCounter")
            .field("scope", &self.scope())
            .field("entry_ttl", &self.entry_ttl)
            .field("upper_limit", &self.upper_limit)
            .finish()
    }
}

impl ScopedCounter {
    /// Create a counter family.
    ///
    /// Fails with [`CounterError::Config`] for an empty scope, a zero limit, or
    /// a TTL that is zero or above [`MAX_ENTRY_TTL_SECS`].
    pub fn new(
        scope: &str,
        entry_ttl_secs: u64,
        upper_limit: u64,
        cache: Arc<dyn CounterCache>,
    ) -> Result<Self> {
        if scope.is_empty() {
            return Err(CounterError::Config("counter scope must not be empty".to_string()));
        }
        if entry_ttl_secs == 0 || entry_ttl_secs > MAX_ENTRY_TTL_SECS {
            return Err(CounterError::Config(format!(
                "entry time to live for scope '{scope}' must be between 1 and {MAX_ENTRY_TTL_SECS} seconds"
            )));
        }
        if upper_limit == 0 {
            return Err(CounterError::Config(format!(
                "upper limit for scope '{scope}' must be positive"
            )));
        }

        debug!(
            scope = %scope,
            entry_ttl_secs = entry_ttl_secs,
            upper_limit = upper_limit,
            "Creating scoped counter"
        );

        Ok(Self {
            prefix: format!("{scope}{SCOPE_SEPARATOR}"),
            entry_ttl: Duration::from_secs(entry_ttl_secs),
            upper_limit,
            cache,
        })
    }

    /// Increment the counter for `key` and return the new count.
    ///
    /// The first hit in a window creates the entry with value 1. A caller that
    /// loses the creation race, or finds the entry already present, goes
    /// through the cache's atomic increment instead.
    pub async fn increment(&self, key: &str) -> Result<u64> {
        let prefixed = self.get_key(key);

        loop {
            if self.cache.get(&prefixed).await?.is_none()
                && self
                    .cache
                    .create_if_absent(&prefixed, 1, self.entry_ttl)
                    .await?
            {
                trace!(key = %prefixed, count = 1, "Started counter window");
                return Ok(1);
            }

            if let Some(count) = self.cache.atomic_increment(&prefixed).await? {
                trace!(key = %prefixed, count = count, "Incremented counter");
                return Ok(count);
            }

            // Expired between the lookup and the increment.
            debug!(key = %prefixed, "Counter entry vanished mid-increment, starting over");
        }
    }

    /// Increment the counter for `key` and report whether it reached the limit.
    pub async fn increment_and_check(&self, key: &str) -> Result<bool> {
        let count = self.increment(key).await?;
        let exceeded = count >= self.upper_limit;
        if exceeded {
            debug!(
                key = %self.get_key(key),
                count = count,
                limit = self.upper_limit,
                "Counter limit reached"
            );
        }
        Ok(exceeded)
    }

    /// Current count for `key`, 0 when there has been no activity in the window.
    pub async fn get_counter(&self, key: &str) -> Result<u64> {
        Ok(self.cache.get(&self.get_key(key)).await?.unwrap_or(0))
    }

    /// Cache key for `key` within this scope.
    pub fn get_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Scope name without the separator.
    pub fn scope(&self) -> &str {
        self.prefix
            .strip_suffix(SCOPE_SEPARATOR)
            .unwrap_or(&self.prefix)
    }

    /// Window length.
    pub fn entry_ttl(&self) -> Duration {
        self.entry_ttl
    }

    /// Count at which `increment_and_check` returns `true`.
    pub fn upper_limit(&self) -> u64 {
        self.upper_limit
    }
}
