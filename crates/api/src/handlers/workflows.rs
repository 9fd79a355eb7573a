use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;
use engine::{Graph, Plan, TriggerKind};

/// What a client sees of a compiled plan.
#[derive(Debug, Serialize)]
pub struct PlanSummary {
    pub graph_id: Uuid,
    pub version: u32,
    pub name: String,
    pub enabled: bool,
    pub trigger: TriggerKind,
    /// Node ids in topological order.
    pub order: Vec<String>,
}

impl From<&Plan> for PlanSummary {
    fn from(plan: &Plan) -> Self {
        Self {
            graph_id: plan.graph_id(),
            version: plan.version().version,
            name: plan.name().to_owned(),
            enabled: plan.enabled(),
            trigger: plan.trigger(),
            order: plan.order().to_vec(),
        }
    }
}

/// Compile and store a graph version. Invalid graphs are rejected with 422.
pub async fn publish(
    State(state): State<AppState>,
    Json(graph): Json<Graph>,
) -> Result<(StatusCode, Json<PlanSummary>), ApiError> {
    let plan = state.executor.publish(&graph).await?;
    Ok((StatusCode::CREATED, Json(PlanSummary::from(plan.as_ref()))))
}

pub async fn get_latest(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<PlanSummary>, ApiError> {
    let plan = state.executor.latest_plan(id).await?;
    Ok(Json(PlanSummary::from(plan.as_ref())))
}
