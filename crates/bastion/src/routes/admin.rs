//! Management endpoints: challenge inspection and live configuration.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use bastion_common::BastionError;

use super::{ApiError, captcha::non_empty_id};
use crate::config::AppConfig;
use crate::state::AppState;
use crate::store::ReloadSource;

#[derive(Deserialize)]
pub struct IdQuery {
    #[serde(default)]
    id: String,
}

/// Stored entry for a challenge, or `{}` when there is none
pub async fn get_status_info(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = non_empty_id(&query.id)?;

    let body = match state.cache.get_entry(id).await? {
        Some(entry) => serde_json::to_value(entry)
            .map_err(|e| BastionError::Internal(e.to_string()))?,
        None => serde_json::json!({}),
    };
    Ok(Json(body))
}

#[derive(Serialize)]
pub struct DeleteResponse {
    success: bool,
}

pub async fn del_status_info(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let id = non_empty_id(&query.id)?;
    state.cache.delete_entry(id).await?;
    tracing::info!(challenge_id = %id, "Challenge deleted by operator");
    Ok(Json(DeleteResponse { success: true }))
}

/// Current configuration with secrets masked
pub async fn get_config(State(state): State<AppState>) -> Json<AppConfig> {
    Json(state.store.get().redacted())
}

/// Push a configuration; only hot-swappable fields take effect
pub async fn update_hot_config(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<AppConfig>, ApiError> {
    state.store.hot_update_json(&body, ReloadSource::Remote).await?;
    Ok(Json(state.store.get().redacted()))
}
