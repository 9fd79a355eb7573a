//! Wake-up (ready set) repository functions.
//!
//! Workers poll the table with `DELETE … WHERE instance_id IN (SELECT … FOR
//! UPDATE SKIP LOCKED)` so concurrent pollers never receive the same row.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::WakeUpRow};

/// Insert or replace the wake-up of an instance.
pub async fn upsert_wakeup(
    pool: &PgPool,
    instance_id: Uuid,
    resume_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO wakeups (instance_id, resume_at)
        VALUES ($1, $2)
        ON CONFLICT (instance_id) DO UPDATE SET resume_at = EXCLUDED.resume_at
        "#,
    )
    .bind(instance_id)
    .bind(resume_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Atomically remove and return up to `limit` due wake-ups, oldest first.
pub async fn take_due(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<WakeUpRow>, DbError> {
    let mut rows = sqlx::query_as::<_, WakeUpRow>(
        r#"
        DELETE FROM wakeups
        WHERE instance_id IN (
            SELECT instance_id FROM wakeups
            WHERE resume_at <= $1
            ORDER BY resume_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        RETURNING instance_id, resume_at
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.sort_by_key(|r| r.resume_at);
    Ok(rows)
}

/// Remove the wake-up of an instance, if any.
pub async fn delete_wakeup(pool: &PgPool, instance_id: Uuid) -> Result<(), DbError> {
    sqlx::query("DELETE FROM wakeups WHERE instance_id = $1")
        .bind(instance_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_wakeup(pool: &PgPool, instance_id: Uuid) -> Result<Option<WakeUpRow>, DbError> {
    let row = sqlx::query_as::<_, WakeUpRow>(
        "SELECT instance_id, resume_at FROM wakeups WHERE instance_id = $1",
    )
    .bind(instance_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
