//! Pluggable TTL-bound cache backends.
//!
//! - `memory` - in-process store with a background expiry sweeper
//! - `remote` - redis with server-side expiry
//! - `manager` - owns the active backend and hot-swaps it on config change

mod manager;
mod memory;
mod remote;

pub use manager::{CacheManager, CacheReloadHook};
pub use memory::MemoryCache;
pub use remote::RedisCache;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bastion_common::{BastionError, CacheEntry};

use crate::config::{AppConfig, CacheType};

/// Uniform contract every cache backend satisfies.
///
/// Keys are caller-chosen challenge ids; the backend applies its own key
/// prefix. A miss is `Ok(None)`, never an error.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Look up an entry
    async fn get_cache(&self, key: &str) -> Result<Option<CacheEntry>, BastionError>;

    /// Store an entry with the backend's configured TTL
    async fn set_cache(&self, key: &str, entry: &CacheEntry) -> Result<(), BastionError>;

    /// Remove an entry; succeeds when the key is absent
    async fn delete_cache(&self, key: &str) -> Result<(), BastionError>;

    /// Atomically flip a pending entry to verified without touching its
    /// remaining TTL. `Ok(false)` when the entry is absent or not pending.
    async fn mark_verified(&self, key: &str) -> Result<bool, BastionError>;

    /// Atomically remove an entry only if it is verified. `Ok(false)` (and
    /// nothing removed) when the entry is absent or still pending.
    async fn take_verified(&self, key: &str) -> Result<bool, BastionError>;

    /// Release connections and stop background tasks
    async fn close(&self) -> Result<(), BastionError>;

    fn kind(&self) -> CacheType;

    fn is_closed(&self) -> bool;
}

/// Backend fingerprint: everything that decides whether a backend must be
/// rebuilt.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheParams {
    pub cache_type: CacheType,
    pub addrs: String,
    pub username: String,
    pub password: String,
    pub key_prefix: String,
    pub ttl: Duration,
    pub cleanup_interval: Duration,
}

impl CacheParams {
    /// Fingerprint for a configuration snapshot
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cache_type: config.cache_type,
            addrs: config.cache_addrs.clone(),
            username: config.cache_username.clone(),
            password: config.cache_password.clone(),
            key_prefix: config.cache_key_prefix.clone(),
            ttl: config.cache_ttl_duration(),
            cleanup_interval: config.cleanup_interval_duration(),
        }
    }

    /// In-process parameters (used by tests and tooling)
    pub fn memory(key_prefix: &str, ttl: Duration, cleanup_interval: Duration) -> Self {
        Self {
            cache_type: CacheType::Memory,
            addrs: String::new(),
            username: String::new(),
            password: String::new(),
            key_prefix: key_prefix.to_string(),
            ttl,
            cleanup_interval,
        }
    }
}

impl fmt::Debug for CacheParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheParams")
            .field("cache_type", &self.cache_type)
            .field("addrs", &self.addrs)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "******" })
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .field("cleanup_interval", &self.cleanup_interval)
            .finish()
    }
}

/// Build a backend for `params`; the only place that branches on the type
pub async fn build_backend(params: &CacheParams) -> Result<Arc<dyn CacheBackend>, BastionError> {
    match params.cache_type {
        CacheType::Memory => Ok(Arc::new(MemoryCache::new(
            &params.key_prefix,
            params.ttl,
            params.cleanup_interval,
        )?)),
        CacheType::Redis => Ok(Arc::new(RedisCache::connect(params).await?)),
    }
}
