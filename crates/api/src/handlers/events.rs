use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;
use engine::TriggerKind;
use nodes::EventContext;

#[derive(Debug, Deserialize)]
pub struct EmitEventDto {
    pub trigger: TriggerKind,
    #[serde(default)]
    pub context: Value,
    /// Upstream event id; re-delivery with the same key is a no-op.
    #[serde(default)]
    pub dedupe_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EmitResponse {
    pub instance_id: Uuid,
}

pub async fn emit(
    Path(graph_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<EmitEventDto>,
) -> Result<(StatusCode, Json<EmitResponse>), ApiError> {
    let context = match payload.context {
        Value::Null => EventContext::default(),
        value @ Value::Object(_) => EventContext::new(value),
        _ => return Err(ApiError::BadRequest("`context` must be a JSON object".into())),
    };

    let instance_id = state
        .executor
        .emit(payload.trigger, graph_id, context, payload.dedupe_key)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(EmitResponse { instance_id })))
}
