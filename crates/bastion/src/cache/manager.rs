//! Cache manager: owns the single active backend and swaps it atomically
//! when the backend fingerprint changes.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bastion_common::BastionError;
use bastion_common::constants::SHUTDOWN_GRACE_SECS;

use super::{CacheBackend, CacheParams, build_backend};
use crate::store::{ConfigStore, HotReloadHook, ReloadSource};

/// Active backend plus the fingerprint it was built from
struct ActiveCache {
    backend: Arc<dyn CacheBackend>,
    params: CacheParams,
}

/// Owner of the active cache backend
pub struct CacheManager {
    active: RwLock<ActiveCache>,
    /// Upper bound on waiting for in-flight callers before closing a
    /// replaced backend
    retire_grace: Duration,
}

impl CacheManager {
    /// Build the first backend; failure here aborts startup
    pub async fn new(params: CacheParams) -> Result<Self, BastionError> {
        let backend = build_backend(&params).await?;
        tracing::info!(cache_type = %params.cache_type, "Cache backend ready");
        Ok(Self::from_backend(backend, params))
    }

    /// Wrap an already-built backend
    pub fn from_backend(backend: Arc<dyn CacheBackend>, params: CacheParams) -> Self {
        Self {
            active: RwLock::new(ActiveCache { backend, params }),
            retire_grace: Duration::from_secs(SHUTDOWN_GRACE_SECS),
        }
    }

    pub fn with_retire_grace(mut self, grace: Duration) -> Self {
        self.retire_grace = grace;
        self
    }

    /// Current backend
    pub fn cache(&self) -> Arc<dyn CacheBackend> {
        Arc::clone(&self.active.read().backend)
    }

    /// Fingerprint of the current backend
    pub fn params(&self) -> CacheParams {
        self.active.read().params.clone()
    }

    /// Rebuild the backend for `params` if its fingerprint differs.
    ///
    /// Returns `Ok(true)` when a new backend was swapped in. On construction
    /// failure the previous backend stays active.
    pub async fn setup(&self, params: CacheParams) -> Result<bool, BastionError> {
        if self.active.read().params == params {
            tracing::debug!("Cache parameters unchanged, keeping backend");
            return Ok(false);
        }

        // Build outside the lock; readers keep using the old backend meanwhile
        let backend = build_backend(&params).await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to build cache backend, keeping previous one");
        })?;

        let from = self.active.read().params.cache_type;
        let to = params.cache_type;
        let replaced = {
            let mut active = self.active.write();
            if active.params == params {
                // A concurrent setup already installed this fingerprint
                Err(backend)
            } else {
                Ok(std::mem::replace(&mut *active, ActiveCache { backend, params }))
            }
        };

        match replaced {
            Ok(previous) => {
                tracing::info!(from = %from, to = %to, "Cache backend swapped");
                self.retire(previous.backend).await;
                Ok(true)
            }
            Err(unused) => {
                if let Err(e) = unused.close().await {
                    tracing::warn!(error = %e, "Failed to close redundant cache backend");
                }
                Ok(false)
            }
        }
    }

    /// Close a replaced backend once callers still holding it let go
    async fn retire(&self, backend: Arc<dyn CacheBackend>) {
        let deadline = Instant::now() + self.retire_grace;
        while Arc::strong_count(&backend) > 1 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if Arc::strong_count(&backend) > 1 {
            tracing::warn!("Closing replaced cache backend with callers still attached");
        }

        if let Err(e) = backend.close().await {
            tracing::warn!(error = %e, "Failed to close replaced cache backend");
        }
    }

    /// Shut down the active backend
    pub async fn close(&self) -> Result<(), BastionError> {
        let backend = self.cache();
        backend.close().await
    }
}

/// Rebuilds the cache backend after every configuration update
pub struct CacheReloadHook {
    manager: Arc<CacheManager>,
}

impl CacheReloadHook {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl HotReloadHook for CacheReloadHook {
    async fn on_reload(&self, store: &ConfigStore, source: ReloadSource) {
        let params = CacheParams::from_config(&store.get());
        match self.manager.setup(params).await {
            Ok(true) => tracing::info!(source = %source, "Cache backend reconfigured"),
            Ok(false) => {}
            Err(e) => tracing::error!(source = %source, error = %e, "Cache hot reload failed"),
        }
    }
}
