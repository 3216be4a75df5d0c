//! HTTP route handlers for Bastion.

use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use bastion_common::BastionError;
use bastion_common::constants::headers::X_API_KEY;

use crate::state::AppState;

mod admin;
mod captcha;
mod health;

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Create the main application router
///
/// CORS is decided once here; toggling `enable_cors` needs a restart.
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let router = Router::new()
        // Health & Status
        .route("/status/health", get(health::health_check))
        .route("/status/ready", get(health::ready_check))
        .nest("/api/v1/public", public_routes(state.clone()))
        .nest("/api/v1/manage", manage_routes(state.clone()))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Challenge endpoints, rate limited
fn public_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/get-data", get(captcha::get_data))
        .route("/check-data", post(captcha::check_data))
        .route("/check-status", post(captcha::check_status))
        .layer(middleware::from_fn_with_state(state, rate_limit))
}

/// Management endpoints, API key protected then rate limited
fn manage_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/get-status-info", get(admin::get_status_info))
        .route("/del-status-info", post(admin::del_status_info))
        .route("/get-config", get(admin::get_config))
        .route("/update-hot-config", post(admin::update_hot_config))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(middleware::from_fn_with_state(state, require_api_key))
}

/// One limiter token per request
async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, ApiError> {
    state.limiter.check()?;
    Ok(next.run(request).await)
}

/// Keys come from the current snapshot, so they follow hot reloads
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_keys = state.store.get().api_keys;
    if api_keys.is_empty() {
        return Ok(next.run(request).await);
    }

    let provided = request
        .headers()
        .get(X_API_KEY)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if api_keys.iter().any(|key| key == provided) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(path = %request.uri().path(), "Rejected management request without valid API key");
        Err(BastionError::Auth("invalid or missing API key".into()).into())
    }
}

/// [`BastionError`] rendered as a JSON error response
#[derive(Debug)]
pub struct ApiError(BastionError);

impl From<BastionError> for ApiError {
    fn from(error: BastionError) -> Self {
        Self(error)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
    retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let details = match &self.0 {
            BastionError::Validation(errors) => errors.iter().map(str::to_string).collect(),
            _ => Vec::new(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = ErrorBody {
            error: self.0.to_string(),
            details,
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}
