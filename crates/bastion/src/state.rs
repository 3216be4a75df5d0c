//! Application state and shared resources.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{CacheManager, CacheParams, CacheReloadHook};
use crate::captcha::{CaptchaGenerator, CaptchaVerifier};
use crate::resilience::{BreakerSettings, CircuitBreaker, GuardedCache, LimiterReloadHook, RateLimiter};
use crate::store::ConfigStore;

/// Hook registry keys
pub mod hook_keys {
    pub const LOG_LEVEL: &str = "UPDATE_LOG_LEVEL";
    pub const LIMITER: &str = "UPDATE_LIMITER";
    pub const CACHE: &str = "UPDATE_CACHE";
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Live configuration
    pub store: Arc<ConfigStore>,

    /// Breaker-guarded access to the active cache backend
    pub cache: Arc<GuardedCache>,

    /// Per-request rate limiter
    pub limiter: Arc<RateLimiter>,

    /// Challenge generator
    pub generator: Arc<CaptchaGenerator>,

    /// Challenge verifier
    pub verifier: Arc<CaptchaVerifier>,

    pub started_at: Instant,
}

impl AppState {
    /// Build the cache and resilience layer from the store's current
    /// snapshot and register their reload hooks.
    ///
    /// Failing to build the first cache backend is fatal.
    pub async fn new(store: Arc<ConfigStore>) -> Result<Self> {
        let config = store.get();

        let manager = Arc::new(
            CacheManager::new(CacheParams::from_config(&config))
                .await
                .context("Failed to initialize cache backend")?,
        );
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_qps.max(1) as u64,
            config.rate_limit_burst.max(1) as u64,
        ));
        let breaker = Arc::new(CircuitBreaker::new(BreakerSettings::default()));

        store.register_hook(hook_keys::LIMITER, Arc::new(LimiterReloadHook::new(limiter.clone())));
        store.register_hook(hook_keys::CACHE, Arc::new(CacheReloadHook::new(manager.clone())));

        Ok(Self {
            store,
            cache: Arc::new(GuardedCache::new(manager, breaker)),
            limiter,
            generator: Arc::new(CaptchaGenerator::default()),
            verifier: Arc::new(CaptchaVerifier::new()),
            started_at: Instant::now(),
        })
    }

    /// Close the active cache backend
    pub async fn shutdown(&self) {
        if let Err(e) = self.cache.manager().close().await {
            tracing::warn!(error = %e, "Failed to close cache backend");
        }
    }

    #[cfg(test)]
    pub async fn for_tests(config: crate::config::AppConfig) -> Self {
        let store = Arc::new(ConfigStore::new(config).unwrap());
        Self::new(store).await.unwrap()
    }
}
