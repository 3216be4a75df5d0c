use std::sync::Arc;

use bastion_common::{BastionError, CacheEntry};

use super::CircuitBreaker;
use crate::cache::CacheManager;

/// Cache access path used by request handlers: every operation resolves the
/// manager's current backend and runs under the shared circuit breaker.
pub struct GuardedCache {
    manager: Arc<CacheManager>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedCache {
    pub fn new(manager: Arc<CacheManager>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { manager, breaker }
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, BastionError> {
        let backend = self.manager.cache();
        self.breaker.call(|| async move { backend.get_cache(key).await }).await
    }

    pub async fn set_entry(&self, key: &str, entry: &CacheEntry) -> Result<(), BastionError> {
        let backend = self.manager.cache();
        self.breaker.call(|| async move { backend.set_cache(key, entry).await }).await
    }

    pub async fn delete_entry(&self, key: &str) -> Result<(), BastionError> {
        let backend = self.manager.cache();
        self.breaker.call(|| async move { backend.delete_cache(key).await }).await
    }

    /// Pending to verified; `false` if another caller got there first
    pub async fn mark_verified(&self, key: &str) -> Result<bool, BastionError> {
        let backend = self.manager.cache();
        self.breaker.call(|| async move { backend.mark_verified(key).await }).await
    }

    /// Consume a verified entry; `true` for exactly one caller
    pub async fn take_verified(&self, key: &str) -> Result<bool, BastionError> {
        let backend = self.manager.cache();
        self.breaker.call(|| async move { backend.take_verified(key).await }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, CacheParams};
    use crate::config::CacheType;
    use crate::resilience::{BreakerSettings, BreakerState};
    use async_trait::async_trait;
    use bastion_common::ChallengeType;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Backend whose every operation fails like an unreachable server
    struct DownBackend {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl CacheBackend for DownBackend {
        async fn get_cache(&self, _key: &str) -> Result<Option<CacheEntry>, BastionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BastionError::BackendOperation("connection refused".into()))
        }
        async fn set_cache(&self, _key: &str, _entry: &CacheEntry) -> Result<(), BastionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BastionError::BackendOperation("connection refused".into()))
        }
        async fn delete_cache(&self, _key: &str) -> Result<(), BastionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BastionError::BackendOperation("connection refused".into()))
        }
        async fn mark_verified(&self, _key: &str) -> Result<bool, BastionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BastionError::BackendOperation("connection refused".into()))
        }
        async fn take_verified(&self, _key: &str) -> Result<bool, BastionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BastionError::BackendOperation("connection refused".into()))
        }
        async fn close(&self) -> Result<(), BastionError> {
            Ok(())
        }
        fn kind(&self) -> CacheType {
            CacheType::Redis
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    fn params() -> CacheParams {
        CacheParams::memory("G:", Duration::from_secs(60), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_round_trip_through_guard() {
        let manager = Arc::new(CacheManager::new(params()).await.unwrap());
        let guarded = GuardedCache::new(manager.clone(), Arc::new(CircuitBreaker::new(Default::default())));

        let entry = CacheEntry::new(ChallengeType::Text, serde_json::json!({"answer": "ABCD"}));
        guarded.set_entry("id-1", &entry).await.unwrap();
        assert_eq!(guarded.get_entry("id-1").await.unwrap(), Some(entry));

        guarded.delete_entry("id-1").await.unwrap();
        assert_eq!(guarded.get_entry("id-1").await.unwrap(), None);
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_backend_opens_breaker() {
        let calls = Arc::new(AtomicU32::new(0));
        let backend = Arc::new(DownBackend { calls: calls.clone() });
        let manager = Arc::new(CacheManager::from_backend(backend, params()));
        let breaker = Arc::new(CircuitBreaker::new(BreakerSettings {
            cooldown: Duration::from_secs(30),
            ..Default::default()
        }));
        let guarded = GuardedCache::new(manager, breaker.clone());

        for _ in 0..4 {
            assert!(matches!(
                guarded.get_entry("id").await,
                Err(BastionError::BackendOperation(_))
            ));
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        assert!(matches!(guarded.delete_entry("id").await, Err(BastionError::BreakerOpen)));
        assert!(matches!(guarded.take_verified("id").await, Err(BastionError::BreakerOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
