use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use vible_core::Event;

use super::response::{ApiError, ApiResponse};
use super::server::GatewayState;

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `POST /api/events`: publish an event to the bus.
pub async fn publish(
    State(state): State<GatewayState>,
    Json(body): Json<PublishRequest>,
) -> Result<ApiResponse, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::validation("event name is required"));
    }

    let run_ids = state.bus.publish(Event::new(body.name, body.data)).await?;
    Ok(ApiResponse::success(serde_json::json!({ "run_ids": run_ids })))
}
