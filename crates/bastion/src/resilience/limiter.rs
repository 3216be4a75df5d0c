//! Process-wide token bucket with hot-swappable rate and capacity.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use bastion_common::BastionError;

use crate::store::{ConfigStore, HotReloadHook, ReloadSource};

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    capacity: f64,
    refill_rate: f64, // tokens per second
}

impl TokenBucket {
    fn new(capacity: u64, refill_rate: u64) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
            capacity: capacity as f64,
            refill_rate: refill_rate as f64,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, tokens: f64) -> bool {
        self.refill(Instant::now());

        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }
}

/// Current limiter settings and fill level
#[derive(Debug, Clone, Serialize)]
pub struct LimiterSnapshot {
    pub qps: u64,
    pub burst: u64,
    pub available: u64,
}

/// Non-blocking rate limiter shared by every request path
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    pub fn new(qps: u64, burst: u64) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(burst, qps)),
        }
    }

    /// Take one token if available
    pub fn allow(&self) -> bool {
        self.bucket.lock().try_consume(1.0)
    }

    /// Like [`allow`](Self::allow), as a typed rejection
    pub fn check(&self) -> Result<(), BastionError> {
        if self.allow() {
            Ok(())
        } else {
            Err(BastionError::RateLimited)
        }
    }

    /// Replace rate and capacity.
    ///
    /// Tokens earned so far are credited at the old rate, then clamped to
    /// the new capacity; the bucket is never refilled or emptied by a
    /// reconfiguration.
    pub fn update(&self, qps: u64, burst: u64) {
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());

        let changed = bucket.refill_rate != qps as f64 || bucket.capacity != burst as f64;
        bucket.refill_rate = qps as f64;
        bucket.capacity = burst as f64;
        bucket.tokens = bucket.tokens.min(bucket.capacity);

        if changed {
            tracing::info!(qps, burst, "Rate limiter updated");
        }
    }

    pub fn snapshot(&self) -> LimiterSnapshot {
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        LimiterSnapshot {
            qps: bucket.refill_rate as u64,
            burst: bucket.capacity as u64,
            available: bucket.tokens.floor() as u64,
        }
    }
}

/// Keeps the limiter in step with `rate_limit_qps` / `rate_limit_burst`
pub struct LimiterReloadHook {
    limiter: Arc<RateLimiter>,
}

impl LimiterReloadHook {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl HotReloadHook for LimiterReloadHook {
    async fn on_reload(&self, store: &ConfigStore, _source: ReloadSource) {
        let config = store.get();
        self.limiter.update(
            config.rate_limit_qps.max(1) as u64,
            config.rate_limit_burst.max(1) as u64,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_excess_over_burst_is_rejected() {
        let limiter = RateLimiter::new(1, 5);

        for _ in 0..5 {
            assert!(limiter.check().is_ok());
        }
        assert!(matches!(limiter.check(), Err(BastionError::RateLimited)));
        assert!(!limiter.allow());
    }

    #[test]
    fn test_refills_over_time() {
        let limiter = RateLimiter::new(100, 1);
        assert!(limiter.allow());
        assert!(!limiter.allow());

        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(limiter.allow());
    }

    #[test]
    fn test_update_clamps_without_refilling() {
        let limiter = RateLimiter::new(1, 10);

        // Shrinking capacity clamps the full bucket
        limiter.update(1, 3);
        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.burst, 3);
        assert_eq!(snapshot.available, 3);

        for _ in 0..3 {
            assert!(limiter.allow());
        }

        // Growing capacity does not hand out free tokens
        limiter.update(1, 100);
        assert!(!limiter.allow());
        assert_eq!(limiter.snapshot().qps, 1);
    }

    #[tokio::test]
    async fn test_reload_hook_applies_config() {
        let store = ConfigStore::new(AppConfig::default()).unwrap();
        let limiter = Arc::new(RateLimiter::new(1000, 1000));
        store.register_hook("limiter", Arc::new(LimiterReloadHook::new(limiter.clone())));

        let config = AppConfig {
            rate_limit_qps: 5,
            rate_limit_burst: 2,
            ..Default::default()
        };
        store.update(config, ReloadSource::Remote).await.unwrap();

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.qps, 5);
        assert_eq!(snapshot.burst, 2);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }
}
