//! Workflow instances: one execution of a plan for one triggering event.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nodes::EventContext;

use crate::plan::{Plan, PlanVersion};

/// Possible statuses for a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Claimed by a worker and being stepped.
    Running,
    /// Suspended until `resume_at` (delay, retry back-off, or not yet started).
    WaitingDelay,
    Succeeded,
    Failed,
    Cancelled,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::WaitingDelay => "waiting_delay",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running"       => Ok(Self::Running),
            "waiting_delay" => Ok(Self::WaitingDelay),
            "succeeded"     => Ok(Self::Succeeded),
            "failed"        => Ok(Self::Failed),
            "cancelled"     => Ok(Self::Cancelled),
            other           => Err(format!("unknown instance status: {other}")),
        }
    }
}

/// The unit of execution. Persisted between steps; never held in memory
/// across a suspension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    /// The plan this instance is bound to for its whole life.
    pub plan_version: PlanVersion,
    /// The node the next step will visit (or the last visited node once
    /// terminal).
    pub current_node: String,
    pub context: EventContext,
    pub status: InstanceStatus,
    pub resume_at: Option<DateTime<Utc>>,
    /// Attempts made per action node.
    pub attempts: BTreeMap<String, u32>,
    /// Optimistic-concurrency counter, bumped by every write.
    pub version: u64,
    pub dedupe_key: Option<String>,
    /// Reason of the most recent action failure.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// A fresh instance positioned at the plan's trigger, ready immediately.
    pub fn new(
        plan: &Plan,
        context: EventContext,
        dedupe_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_version: plan.version(),
            current_node: plan.start().to_owned(),
            context,
            status: InstanceStatus::WaitingDelay,
            resume_at: Some(now),
            attempts: BTreeMap::new(),
            version: 0,
            dedupe_key,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn attempts_for(&self, node_id: &str) -> u32 {
        self.attempts.get(node_id).copied().unwrap_or(0)
    }

    /// Count one more attempt at `node_id` and return its 1-based number.
    pub fn record_attempt(&mut self, node_id: &str) -> u32 {
        let counter = self.attempts.entry(node_id.to_owned()).or_insert(0);
        *counter += 1;
        *counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_text_form() {
        for status in [
            InstanceStatus::Running,
            InstanceStatus::WaitingDelay,
            InstanceStatus::Succeeded,
            InstanceStatus::Failed,
            InstanceStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<InstanceStatus>(), Ok(status));
        }
        assert!("paused".parse::<InstanceStatus>().is_err());
    }

    #[test]
    fn only_final_statuses_are_terminal() {
        assert!(!InstanceStatus::Running.is_terminal());
        assert!(!InstanceStatus::WaitingDelay.is_terminal());
        assert!(InstanceStatus::Cancelled.is_terminal());
    }
}
