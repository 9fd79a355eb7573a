//! Append-only audit log. Rows are never updated or deleted by the engine.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::AuditEntryRow};

/// Append one audit entry.
pub async fn insert_audit_entry(
    pool: &PgPool,
    instance_id: Uuid,
    node_id: &str,
    recorded_at: DateTime<Utc>,
    outcome: serde_json::Value,
    detail: &str,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO audit_entries (instance_id, node_id, recorded_at, outcome, detail)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(instance_id)
    .bind(node_id)
    .bind(recorded_at)
    .bind(outcome)
    .bind(detail)
    .execute(pool)
    .await?;
    Ok(())
}

/// All entries of one instance in append order.
pub async fn list_audit_entries(
    pool: &PgPool,
    instance_id: Uuid,
) -> Result<Vec<AuditEntryRow>, DbError> {
    let rows = sqlx::query_as::<_, AuditEntryRow>(
        r#"
        SELECT id, instance_id, node_id, recorded_at, outcome, detail
        FROM audit_entries
        WHERE instance_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(instance_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
