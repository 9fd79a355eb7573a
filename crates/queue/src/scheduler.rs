//! The `Scheduler` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SchedulerError;

/// A pending request to resume an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeUp {
    pub instance_id: Uuid,
    pub resume_at: DateTime<Utc>,
}

/// Time-indexed ready set of suspended instances.
///
/// Guarantees:
/// - an instance is never returned by [`poll_ready`](Scheduler::poll_ready)
///   before its `resume_at`; lateness is acceptable.
/// - delivery is at-least-once. Callers must still claim the instance
///   through the instance store before executing it; losing that race is
///   normal and the loser skips the instance.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Arrange for `instance_id` to become ready at `resume_at`.
    ///
    /// Scheduling an instance that already has a pending wake-up replaces it.
    async fn schedule_at(
        &self,
        instance_id: Uuid,
        resume_at: DateTime<Utc>,
    ) -> Result<(), SchedulerError>;

    /// Remove and return every instance whose `resume_at <= now`, oldest first.
    async fn poll_ready(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, SchedulerError>;

    /// Drop any pending wake-up for `instance_id`. Not an error if none exists.
    async fn cancel(&self, instance_id: Uuid) -> Result<(), SchedulerError>;

    /// The pending wake-up for `instance_id`, if any.
    async fn pending(&self, instance_id: Uuid) -> Result<Option<WakeUp>, SchedulerError>;
}
