//! Workflow instance repository functions.
//!
//! Every mutation is a single-row conditional update keyed by `id`, so two
//! workers racing on the same instance are arbitrated by Postgres.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{InsertOutcome, InstanceRow},
};

const INSTANCE_COLUMNS: &str = "id, graph_id, plan_version, current_node, context, status, \
     resume_at, attempts, version, dedupe_key, last_error, created_at, updated_at";

/// Insert a new instance.
///
/// When `dedupe_key` is set and an instance with the same
/// `(graph_id, dedupe_key)` exists, nothing is written and the existing id
/// is returned.
pub async fn insert_instance(pool: &PgPool, row: &InstanceRow) -> Result<InsertOutcome, DbError> {
    let inserted: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO instances
            (id, graph_id, plan_version, current_node, context, status, resume_at,
             attempts, version, dedupe_key, last_error, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (graph_id, dedupe_key) WHERE dedupe_key IS NOT NULL DO NOTHING
        RETURNING id
        "#,
    )
    .bind(row.id)
    .bind(row.graph_id)
    .bind(row.plan_version)
    .bind(&row.current_node)
    .bind(&row.context)
    .bind(&row.status)
    .bind(row.resume_at)
    .bind(&row.attempts)
    .bind(row.version)
    .bind(&row.dedupe_key)
    .bind(&row.last_error)
    .bind(row.created_at)
    .bind(row.updated_at)
    .fetch_optional(pool)
    .await?;

    if inserted.is_some() {
        return Ok(InsertOutcome::Inserted);
    }

    let (existing,): (Uuid,) =
        sqlx::query_as("SELECT id FROM instances WHERE graph_id = $1 AND dedupe_key = $2")
            .bind(row.graph_id)
            .bind(&row.dedupe_key)
            .fetch_optional(pool)
            .await?
            .ok_or(DbError::NotFound)?;

    Ok(InsertOutcome::Duplicate(existing))
}

/// Fetch a single instance by its primary key.
pub async fn get_instance(pool: &PgPool, id: Uuid) -> Result<InstanceRow, DbError> {
    let row = sqlx::query_as::<_, InstanceRow>(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Overwrite an instance if its stored `version` still equals
/// `expected_version`. The row's own `version` is written as the new value.
///
/// Returns `false` when another writer got there first.
pub async fn update_instance(
    pool: &PgPool,
    row: &InstanceRow,
    expected_version: i64,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE instances
        SET current_node = $3, context = $4, status = $5, resume_at = $6,
            attempts = $7, version = $8, last_error = $9, updated_at = $10
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(row.id)
    .bind(expected_version)
    .bind(&row.current_node)
    .bind(&row.context)
    .bind(&row.status)
    .bind(row.resume_at)
    .bind(&row.attempts)
    .bind(row.version)
    .bind(&row.last_error)
    .bind(row.updated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Atomically move an instance from `from_status` to `to_status`.
///
/// Returns the updated row, or `None` if the instance was not in
/// `from_status` (someone else claimed or cancelled it).
pub async fn transition_status(
    pool: &PgPool,
    id: Uuid,
    from_status: &[&str],
    to_status: &str,
    now: DateTime<Utc>,
) -> Result<Option<InstanceRow>, DbError> {
    let from: Vec<String> = from_status.iter().map(|s| s.to_string()).collect();
    let row = sqlx::query_as::<_, InstanceRow>(&format!(
        r#"
        UPDATE instances
        SET status = $3, version = version + 1, updated_at = $4
        WHERE id = $1 AND status = ANY($2)
        RETURNING {INSTANCE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&from)
    .bind(to_status)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Instances that look abandoned as of `cutoff`: waiting past their
/// `resume_at`, or running without an update since `cutoff`.
pub async fn list_stale(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<InstanceRow>, DbError> {
    let rows = sqlx::query_as::<_, InstanceRow>(&format!(
        r#"
        SELECT {INSTANCE_COLUMNS} FROM instances
        WHERE (status = 'waiting_delay' AND resume_at < $1)
           OR (status = 'running' AND updated_at < $1)
        ORDER BY updated_at ASC
        LIMIT $2
        "#
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
