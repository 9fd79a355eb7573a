use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;
use engine::{AuditEntry, WorkflowInstance};

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowInstance>, ApiError> {
    Ok(Json(state.executor.instance(id).await?))
}

/// Cancel a running or waiting instance. Terminal instances yield 409.
pub async fn cancel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowInstance>, ApiError> {
    Ok(Json(state.executor.cancel(id).await?))
}

pub async fn audit(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    Ok(Json(state.executor.audit_trail(id).await?))
}
