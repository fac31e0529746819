//! In-process counter cache backed by a sharded concurrent map.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::CounterCache;
use crate::error::{CounterError, Result};

/// A counter value and the instant it stops being visible.
#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    value: u64,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory [`CounterCache`] with per-entry expiry.
///
/// Per-key atomicity comes from the shard lock dashmap holds while an entry
/// is inspected and mutated. Expired entries are ignored on access and
/// removed by [`InMemoryCache::purge_expired`] or the background sweeper.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    /// Whether the cache holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let live = entry.is_live(now);
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Periodically purge expired entries until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    debug!("Counter cache dropped, stopping sweeper");
                    break;
                };
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(
                        removed = removed,
                        remaining = cache.entries.len(),
                        "Swept expired counter entries"
                    );
                }
            }
        })
    }
}

#[async_trait]
impl CounterCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<u64>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .and_then(|entry| entry.is_live(now).then_some(entry.value)))
    }

    async fn create_if_absent(&self, key: &str, initial: u64, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).ok_or_else(|| {
            CounterError::Config(format!("time to live {ttl:?} for '{key}' is out of range"))
        })?;
        let fresh = CacheEntry {
            value: initial,
            expires_at,
        };

        let created = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    false
                } else {
                    occupied.insert(fresh);
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        };

        trace!(key = %key, created = created, "create_if_absent");
        Ok(created)
    }

    async fn atomic_increment(&self, key: &str) -> Result<Option<u64>> {
        let now = Instant::now();
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        if !entry.is_live(now) {
            return Ok(None);
        }
        entry.value = entry.value.saturating_add(1);
        Ok(Some(entry.value))
    }
}
