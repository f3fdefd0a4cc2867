use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;

use crate::AppState;
use crate::error::HubError;
use crate::ws::protocol::parse_profile_id;

#[derive(Deserialize)]
pub struct CreateProfileRequest {
    name: String,
}

/// Create a citizen profile; responds with the assigned id
pub async fn create_profile(
    State(state): State<AppState>,
    Json(req): Json<CreateProfileRequest>,
) -> Result<Response, HubError> {
    if req.name.trim().is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_profile",
                "message": "name is required",
            })),
        )
            .into_response());
    }
    let profile_id = state.hub.create_profile(&req.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "profileId": profile_id })),
    )
        .into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogRequest {
    profile_id: Value,
    action: String,
    #[serde(default)]
    details: Value,
}

/// Append an entry to a profile's activity log
pub async fn log_activity(
    State(state): State<AppState>,
    Json(req): Json<ActivityLogRequest>,
) -> Result<Json<Value>, HubError> {
    let profile_id = parse_profile_id(&req.profile_id)?;
    let recorded = state
        .hub
        .record_activity(profile_id, &req.action, req.details)
        .await?;
    Ok(Json(serde_json::json!({ "recorded": recorded })))
}
