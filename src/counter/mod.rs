//! Scoped abuse-prevention counters.

mod generic;
mod ip;
mod scoped;

pub use generic::GenericCounter;
pub use ip::IpCounter;
pub use scoped::{ScopedCounter, MAX_ENTRY_TTL_SECS, SCOPE_SEPARATOR};
