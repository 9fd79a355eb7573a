//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models and carry no domain behaviour.
//! Domain types live in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// plans
// ---------------------------------------------------------------------------

/// A compiled execution plan row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanRow {
    pub graph_id: Uuid,
    pub version: i32,
    pub name: String,
    pub enabled: bool,
    /// Full JSON plan (steps, start node, trigger kind, …)
    pub plan: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// instances
// ---------------------------------------------------------------------------

/// A persisted workflow instance row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstanceRow {
    pub id: Uuid,
    pub graph_id: Uuid,
    pub plan_version: i32,
    pub current_node: String,
    pub context: serde_json::Value,
    /// One of `running`, `waiting_delay`, `succeeded`, `failed`, `cancelled`.
    pub status: String,
    pub resume_at: Option<DateTime<Utc>>,
    /// Map of node id → attempt count.
    pub attempts: serde_json::Value,
    pub version: i64,
    pub dedupe_key: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of inserting an instance that may carry a dedupe key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same `(graph_id, dedupe_key)` already existed.
    Duplicate(Uuid),
}

// ---------------------------------------------------------------------------
// wakeups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WakeUpRow {
    pub instance_id: Uuid,
    pub resume_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// audit_entries
// ---------------------------------------------------------------------------

/// An audit entry row. `id` orders entries of one instance.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntryRow {
    pub id: i64,
    pub instance_id: Uuid,
    pub node_id: String,
    pub recorded_at: DateTime<Utc>,
    pub outcome: serde_json::Value,
    pub detail: String,
}
