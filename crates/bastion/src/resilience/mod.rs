//! Request-path protection: a hot-reconfigurable rate limiter and a circuit
//! breaker around cache access.

mod breaker;
mod guard;
mod limiter;

pub use breaker::{BreakerSettings, BreakerState, CircuitBreaker, Counts};
pub use guard::GuardedCache;
pub use limiter::{LimiterReloadHook, LimiterSnapshot, RateLimiter};
