//! Health check endpoints.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::config::CacheType;
use crate::resilience::{BreakerState, LimiterSnapshot};
use crate::state::AppState;

/// Key probed by the readiness check; never written
const READY_PROBE_KEY: &str = "__ready_probe__";

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    service_name: String,
    config_version: i64,
    cache_type: CacheType,
    breaker: BreakerState,
    rate_limit: LimiterSnapshot,
    dynamic_config: bool,
    service_discovery: bool,
    uptime_secs: u64,
}

/// Basic health check (is the server running?)
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = state.store.get();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        service_name: config.service_name,
        config_version: config.config_version,
        cache_type: state.cache.manager().params().cache_type,
        breaker: state.cache.breaker().state(),
        rate_limit: state.limiter.snapshot(),
        dynamic_config: config.enable_dynamic_config,
        service_discovery: config.enable_service_discovery,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    cache: bool,
}

/// Readiness check (is the active cache backend answering?)
pub async fn ready_check(State(state): State<AppState>) -> Result<Json<ReadyResponse>, StatusCode> {
    match state.cache.get_entry(READY_PROBE_KEY).await {
        Ok(_) => Ok(Json(ReadyResponse {
            status: "ready",
            cache: true,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
