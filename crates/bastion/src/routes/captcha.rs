//! Public challenge endpoints.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use bastion_common::{BastionError, CaptchaChallenge, CaptchaResult};

use super::ApiError;
use crate::state::AppState;

/// Issue a new challenge
pub async fn get_data(State(state): State<AppState>) -> Result<Json<CaptchaChallenge>, ApiError> {
    let ttl = state.store.get().cache_ttl;
    let challenge = state.generator.generate(&state.cache, ttl).await?;
    Ok(Json(challenge))
}

#[derive(Deserialize)]
pub struct CheckDataRequest {
    id: String,
    answer: String,
}

/// Verify an answer
pub async fn check_data(
    State(state): State<AppState>,
    Json(payload): Json<CheckDataRequest>,
) -> Result<Json<CaptchaResult>, ApiError> {
    let id = non_empty_id(&payload.id)?;
    let result = state.verifier.verify(&state.cache, id, &payload.answer).await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct CheckStatusRequest {
    id: String,
}

#[derive(Serialize)]
pub struct CheckStatusResponse {
    verified: bool,
}

/// Confirm a verified challenge, consuming it
pub async fn check_status(
    State(state): State<AppState>,
    Json(payload): Json<CheckStatusRequest>,
) -> Result<Json<CheckStatusResponse>, ApiError> {
    let id = non_empty_id(&payload.id)?;
    let verified = state.verifier.check_status(&state.cache, id).await?;
    Ok(Json(CheckStatusResponse { verified }))
}

pub(super) fn non_empty_id(id: &str) -> Result<&str, BastionError> {
    let id = id.trim();
    if id.is_empty() {
        Err(BastionError::InvalidInput("challenge id is required".into()))
    } else {
        Ok(id)
    }
}
