//! Execution plan storage. Plans are written once per `(graph_id, version)`
//! and never updated.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::PlanRow};

const PLAN_COLUMNS: &str = "graph_id, version, name, enabled, plan, created_at";

/// Insert a compiled plan.
///
/// Re-inserting an existing `(graph_id, version)` is a no-op: two compiles of
/// the same saved graph state are interchangeable, so the first one wins.
pub async fn insert_plan(pool: &PgPool, row: &PlanRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO plans (graph_id, version, name, enabled, plan, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (graph_id, version) DO NOTHING
        "#,
    )
    .bind(row.graph_id)
    .bind(row.version)
    .bind(&row.name)
    .bind(row.enabled)
    .bind(&row.plan)
    .bind(row.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch one plan version.
pub async fn get_plan(pool: &PgPool, graph_id: Uuid, version: i32) -> Result<PlanRow, DbError> {
    let row = sqlx::query_as::<_, PlanRow>(&format!(
        "SELECT {PLAN_COLUMNS} FROM plans WHERE graph_id = $1 AND version = $2"
    ))
    .bind(graph_id)
    .bind(version)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Fetch the highest plan version of a graph.
pub async fn latest_plan(pool: &PgPool, graph_id: Uuid) -> Result<PlanRow, DbError> {
    let row = sqlx::query_as::<_, PlanRow>(&format!(
        "SELECT {PLAN_COLUMNS} FROM plans WHERE graph_id = $1 ORDER BY version DESC LIMIT 1"
    ))
    .bind(graph_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}
