//! Circuit breaker around cache backend calls.
//!
//! Closed: calls pass; consecutive backend failures above the threshold trip
//! the breaker. Open: calls are rejected without running until the cooldown
//! elapses. Half-open: a bounded number of trial calls decide between
//! closing again and re-opening.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use bastion_common::BastionError;
use bastion_common::constants::{BREAKER_COOLDOWN_SECS, BREAKER_FAILURE_THRESHOLD, BREAKER_INTERVAL_SECS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub name: String,
    /// Trip once consecutive failures exceed this
    pub failure_threshold: u32,
    /// Trial calls admitted while half-open
    pub half_open_max_requests: u32,
    /// Time spent open before trials are allowed
    pub cooldown: Duration,
    /// Period after which closed-state counts are cleared; zero never clears
    pub interval: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            name: "cache".to_string(),
            failure_threshold: BREAKER_FAILURE_THRESHOLD,
            half_open_max_requests: 1,
            cooldown: Duration::from_secs(BREAKER_COOLDOWN_SECS),
            interval: Duration::from_secs(BREAKER_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

struct Inner {
    state: BreakerState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        let expiry = (!settings.interval.is_zero()).then(|| Instant::now() + settings.interval);
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.current_state(&mut inner, Instant::now())
    }

    pub fn counts(&self) -> Counts {
        let mut inner = self.inner.lock();
        self.current_state(&mut inner, Instant::now());
        inner.counts
    }

    /// Run `f` under the breaker.
    ///
    /// Rejected calls return [`BastionError::BreakerOpen`] without invoking
    /// `f`. Only [`BastionError::BackendOperation`] counts as a failure.
    /// A call dropped before completion says nothing about the backend: it
    /// is ignored while closed and only re-opens a half-open breaker, whose
    /// trial slot it held.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T, BastionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BastionError>>,
    {
        let generation = self.before_call()?;
        let mut pending = PendingCall {
            breaker: self,
            generation,
            finished: false,
        };

        let result = f().await;
        let success = !matches!(result, Err(BastionError::BackendOperation(_)));
        pending.finish(success);
        result
    }

    fn before_call(&self) -> Result<u64, BastionError> {
        let mut inner = self.inner.lock();
        let state = self.current_state(&mut inner, Instant::now());

        match state {
            BreakerState::Open => Err(BastionError::BreakerOpen),
            BreakerState::HalfOpen if inner.counts.requests >= self.settings.half_open_max_requests => {
                Err(BastionError::BreakerOpen)
            }
            _ => {
                inner.counts.requests += 1;
                Ok(inner.generation)
            }
        }
    }

    fn after_call(&self, generation: u64, success: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let state = self.current_state(&mut inner, now);
        if generation != inner.generation {
            return;
        }

        if success {
            self.on_success(&mut inner, state, now);
        } else {
            self.on_failure(&mut inner, state, now);
        }
    }

    /// Caller gave up before the call finished
    fn abandon_call(&self, generation: u64) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let state = self.current_state(&mut inner, now);
        if generation != inner.generation {
            return;
        }

        if state == BreakerState::HalfOpen {
            tracing::debug!(breaker = %self.settings.name, "Half-open trial cancelled");
            self.on_failure(&mut inner, state, now);
        }
    }

    fn on_success(&self, inner: &mut Inner, state: BreakerState, now: Instant) {
        let counts = &mut inner.counts;
        counts.total_successes += 1;
        counts.consecutive_successes += 1;
        counts.consecutive_failures = 0;

        if state == BreakerState::HalfOpen
            && counts.consecutive_successes >= self.settings.half_open_max_requests
        {
            self.set_state(inner, BreakerState::Closed, now);
        }
    }

    fn on_failure(&self, inner: &mut Inner, state: BreakerState, now: Instant) {
        match state {
            BreakerState::Closed => {
                let counts = &mut inner.counts;
                counts.total_failures += 1;
                counts.consecutive_failures += 1;
                counts.consecutive_successes = 0;
                if counts.consecutive_failures > self.settings.failure_threshold {
                    self.set_state(inner, BreakerState::Open, now);
                }
            }
            BreakerState::HalfOpen => self.set_state(inner, BreakerState::Open, now),
            BreakerState::Open => {}
        }
    }

    /// Apply time-based transitions and return the resulting state
    fn current_state(&self, inner: &mut Inner, now: Instant) -> BreakerState {
        match inner.state {
            BreakerState::Closed => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            BreakerState::Open => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(inner, BreakerState::HalfOpen, now);
                }
            }
            BreakerState::HalfOpen => {}
        }
        inner.state
    }

    fn set_state(&self, inner: &mut Inner, state: BreakerState, now: Instant) {
        if inner.state == state {
            return;
        }
        let from = inner.state;
        inner.state = state;
        self.new_generation(inner, now);

        match state {
            BreakerState::Open => {
                tracing::warn!(breaker = %self.settings.name, from = %from, to = %state, "Circuit breaker opened")
            }
            _ => {
                tracing::info!(breaker = %self.settings.name, from = %from, to = %state, "Circuit breaker state changed")
            }
        }
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            BreakerState::Closed => {
                (!self.settings.interval.is_zero()).then(|| now + self.settings.interval)
            }
            BreakerState::Open => Some(now + self.settings.cooldown),
            BreakerState::HalfOpen => None,
        };
    }
}

/// Records the outcome of an admitted call, including cancellation
struct PendingCall<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    finished: bool,
}

impl PendingCall<'_> {
    fn finish(&mut self, success: bool) {
        self.finished = true;
        self.breaker.after_call(self.generation, success);
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.abandon_call(self.generation);
        }
    }
}
