//! Bastion verification-challenge service.
//!
//! - `store` - live configuration snapshot and reload hooks
//! - `reload` - config file watcher
//! - `cache` - pluggable TTL cache backends and the hot-swapping manager
//! - `resilience` - rate limiter, circuit breaker, guarded cache access
//! - `captcha` - challenge issuance and verification
//! - `routes` - HTTP surface

pub mod cache;
pub mod captcha;
pub mod config;
pub mod logging;
pub mod reload;
pub mod resilience;
pub mod routes;
pub mod state;
pub mod store;
