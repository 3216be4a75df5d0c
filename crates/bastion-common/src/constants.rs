//! Shared constants for Bastion components.

/// Default service identity
pub const DEFAULT_SERVICE_NAME: &str = "bastion";

/// Default HTTP listener port
pub const DEFAULT_HTTP_PORT: &str = "8080";

/// Default RPC listener port
pub const DEFAULT_GRPC_PORT: &str = "50051";

/// Default cache entry TTL (seconds)
pub const DEFAULT_CACHE_TTL_SECS: i64 = 60;

/// Default in-process sweeper period (seconds)
pub const DEFAULT_CACHE_CLEANUP_INTERVAL_SECS: i64 = 10;

/// Default cache key prefix
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "CAPTCHA_DATA:";

/// Default limiter refill rate
pub const DEFAULT_RATE_LIMIT_QPS: i64 = 1000;

/// Default limiter bucket capacity
pub const DEFAULT_RATE_LIMIT_BURST: i64 = 1000;

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Consecutive cache failures tolerated before the breaker trips
pub const BREAKER_FAILURE_THRESHOLD: u32 = 3;

/// Breaker open-state cooldown (seconds)
pub const BREAKER_COOLDOWN_SECS: u64 = 5;

/// Breaker closed-state counter reset period (seconds)
pub const BREAKER_INTERVAL_SECS: u64 = 60;

/// Remote cache connect timeout (seconds)
pub const CACHE_CONNECT_TIMEOUT_SECS: u64 = 3;

/// Remote cache per-command response timeout (milliseconds)
pub const CACHE_OPERATION_TIMEOUT_MS: u64 = 1000;

/// Grace period for draining listeners on shutdown (seconds)
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// HTTP header names
pub mod headers {
    /// API key header for management endpoints
    pub const X_API_KEY: &str = "X-API-Key";
}
