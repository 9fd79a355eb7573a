//! Audit trail: one immutable entry per node visit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// What happened at a node visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The trigger node was passed.
    Entered,
    ConditionEvaluated { result: bool },
    /// The predicate could not be evaluated; the `false` branch was taken.
    PredicateUnresolved,
    ActionSucceeded { attempt: u32 },
    /// `retry_at` is set when another attempt has been scheduled.
    ActionFailed {
        attempt: u32,
        permanent: bool,
        retry_at: Option<DateTime<Utc>>,
    },
    DelayScheduled { resume_at: DateTime<Utc> },
    Cancelled,
    /// A step finished after the instance was cancelled; its result was
    /// discarded.
    CancelledPostHoc,
    /// The instance pointed at a node its plan does not contain and was
    /// failed without running it.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub instance_id: Uuid,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: AuditOutcome,
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit backend error: {0}")]
    Backend(String),
}

/// Append-only sink for audit entries.
///
/// The engine never aborts a step because of a recorder failure; it logs it.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError>;

    /// Entries of one instance, oldest first.
    async fn history(&self, instance_id: Uuid) -> Result<Vec<AuditEntry>, AuditError>;
}

/// Keeps entries in memory. Used by tests and the in-memory server mode.
#[derive(Default)]
pub struct MemoryAuditRecorder {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries of one instance, in append order.
    pub async fn entries_for(&self, instance_id: Uuid) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AuditRecorder for MemoryAuditRecorder {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn history(&self, instance_id: Uuid) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.entries_for(instance_id).await)
    }
}
