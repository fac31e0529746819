//! Per remote address request counter.

use std::ops::Deref;
use std::sync::Arc;

use super::ScopedCounter;
use crate::cache::CounterCache;
use crate::config::CounterSettings;
use crate::error::Result;

/// Scope of the IP counter.
pub const IP_SCOPE: &str = "ip";

/// Counts requests per remote IP in a short window.
///
/// Used by the admission filter ahead of almost every request to flag rapid
/// fire traffic from one address.
#[derive(Debug, Clone)]
pub struct IpCounter {
    inner: ScopedCounter,
}

impl IpCounter {
    /// Create the IP counter from its settings.
    pub fn new(cache: Arc<dyn CounterCache>, settings: &CounterSettings) -> Result<Self> {
        let inner = ScopedCounter::new(
            IP_SCOPE,
            settings.entry_ttl_secs,
            settings.number_of_safe_requests,
            cache,
        )?;
        Ok(Self { inner })
    }

    /// Create the IP counter with the default 30 second window and 5 requests.
    pub fn with_defaults(cache: Arc<dyn CounterCache>) -> Result<Self> {
        Self::new(cache, &CounterSettings::ip_defaults())
    }

    /// Number of hits from `ip` in the current window.
    pub async fn get_ip_hits(&self, ip: &str) -> Result<u64> {
        self.inner.get_counter(ip).await
    }
}

impl Deref for IpCounter {
    type Target = ScopedCounter;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
