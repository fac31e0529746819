//! Counter for sensitive actions keyed by an arbitrary identifier.

use std::ops::Deref;
use std::sync::Arc;

use super::ScopedCounter;
use crate::cache::CounterCache;
use crate::config::CounterSettings;
use crate::error::Result;

/// Scope of the generic action counter.
pub const GENERIC_SCOPE: &str = "generic";

/// Counts tries of multi-step flows such as password reset or email
/// confirmation, independently of the caller's address. An attacker rotating
/// IPs is still bounded per target identity.
#[derive(Debug, Clone)]
pub struct GenericCounter {
    inner: ScopedCounter,
}

impl GenericCounter {
    /// Create the generic counter from its settings.
    pub fn new(cache: Arc<dyn CounterCache>, settings: &CounterSettings) -> Result<Self> {
        let inner = ScopedCounter::new(
            GENERIC_SCOPE,
            settings.entry_ttl_secs,
            settings.number_of_safe_requests,
            cache,
        )?;
        Ok(Self { inner })
    }

    /// Create the generic counter with the default one hour window and 5 tries.
    pub fn with_defaults(cache: Arc<dyn CounterCache>) -> Result<Self> {
        Self::new(cache, &CounterSettings::generic_defaults())
    }

    /// Key for `action` performed against `target`, e.g. `reset-password:alice@example.com`.
    pub fn action_key(action: &str, target: &str) -> String {
        format!("{action}:{target}")
    }
}

impl Deref for GenericCounter {
    type Target = ScopedCounter;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
