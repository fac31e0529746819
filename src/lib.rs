//! SSO Counters - abuse-prevention counters for request admission
//!
//! This crate implements scoped, TTL-bounded counters on top of a shared
//! key-value cache. Filters in front of the business logic increment a
//! counter per remote IP or per sensitive action and flag the request once the
//! configured number of safe requests has been reached.

pub mod admission;
pub mod cache;
pub mod config;
pub mod counter;
pub mod error;
pub mod server;
