use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::AppState;
use crate::error::HubError;
use crate::models::Document;

/// Current document, for the initial load of a console
pub async fn get_document(State(state): State<AppState>) -> Result<Json<Document>, HubError> {
    Ok(Json(state.hub.get_document().await?))
}

/// Replace the whole document (HTTP twin of the `syncDB` frame)
pub async fn replace_document(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<StatusCode, Response> {
    let document = parse_document(body)?;
    state
        .hub
        .replace_document(document)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_document(body: Value) -> Result<Document, Response> {
    Document::from_value(body).map_err(|e| {
        warn!("Rejected document: {}", e);
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_document",
                "message": e.to_string(),
            })),
        )
            .into_response()
    })
}

pub async fn list_datasets(State(state): State<AppState>) -> Result<Json<Vec<String>>, HubError> {
    Ok(Json(state.hub.list_datasets().await?))
}

#[derive(Deserialize)]
pub struct SwitchDatasetRequest {
    filename: String,
}

pub async fn switch_dataset(
    State(state): State<AppState>,
    Json(req): Json<SwitchDatasetRequest>,
) -> Result<impl IntoResponse, HubError> {
    state.hub.switch_dataset(&req.filename).await?;
    Ok(Json(serde_json::json!({
        "message": format!("Switched to {}", req.filename),
    })))
}

#[derive(Deserialize)]
pub struct SaveDatasetRequest {
    filename: String,
    /// Document to save; the active document when absent
    #[serde(default)]
    data: Option<Value>,
}

pub async fn save_dataset(
    State(state): State<AppState>,
    Json(req): Json<SaveDatasetRequest>,
) -> Result<impl IntoResponse, Response> {
    let data = req.data.map(parse_document).transpose()?;
    let filename = state
        .hub
        .save_dataset(&req.filename, data)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(serde_json::json!({
        "message": format!("Database saved as {filename}"),
        "filename": filename,
    })))
}
