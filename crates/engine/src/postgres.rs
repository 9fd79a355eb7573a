//! Postgres-backed implementations of the engine's storage seams, built on
//! the `db` crate's repository functions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use db::models::{InsertOutcome, InstanceRow, PlanRow};
use db::repository::{audit, instances, plans, wakeups};
use db::{DbError, DbPool};
use nodes::EventContext;
use queue::{Scheduler, SchedulerError, WakeUp};

use crate::audit::{AuditEntry, AuditError, AuditRecorder};
use crate::instance::{InstanceStatus, WorkflowInstance};
use crate::plan::{Plan, PlanVersion};
use crate::store::{CreateOutcome, InstanceStore, PlanStore, StoreError};

/// Wake-ups taken off the table per poll.
const POLL_BATCH: i64 = 100;

fn backend(err: DbError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {err}"))
}

fn db_version(version: u32) -> Result<i32, StoreError> {
    i32::try_from(version).map_err(|e| corrupt("plan version", e))
}

// ---------------------------------------------------------------------------
// Row conversions
// ---------------------------------------------------------------------------

impl TryFrom<&WorkflowInstance> for InstanceRow {
    type Error = StoreError;

    fn try_from(instance: &WorkflowInstance) -> Result<Self, Self::Error> {
        Ok(Self {
            id: instance.id,
            graph_id: instance.plan_version.graph_id,
            plan_version: db_version(instance.plan_version.version)?,
            current_node: instance.current_node.clone(),
            context: instance.context.0.clone(),
            status: instance.status.as_str().to_owned(),
            resume_at: instance.resume_at,
            attempts: serde_json::to_value(&instance.attempts)
                .map_err(|e| corrupt("attempts", e))?,
            version: i64::try_from(instance.version).map_err(|e| corrupt("version", e))?,
            dedupe_key: instance.dedupe_key.clone(),
            last_error: instance.last_error.clone(),
            created_at: instance.created_at,
            updated_at: instance.updated_at,
        })
    }
}

impl TryFrom<InstanceRow> for WorkflowInstance {
    type Error = StoreError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            plan_version: PlanVersion {
                graph_id: row.graph_id,
                version: u32::try_from(row.plan_version)
                    .map_err(|e| corrupt("plan version", e))?,
            },
            current_node: row.current_node,
            context: EventContext::new(row.context),
            status: row
                .status
                .parse::<InstanceStatus>()
                .map_err(|e| corrupt("status", e))?,
            resume_at: row.resume_at,
            attempts: serde_json::from_value(row.attempts).map_err(|e| corrupt("attempts", e))?,
            version: u64::try_from(row.version).map_err(|e| corrupt("version", e))?,
            dedupe_key: row.dedupe_key,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn plan_from_row(row: PlanRow) -> Result<Plan, StoreError> {
    serde_json::from_value(row.plan).map_err(|e| corrupt("plan", e))
}

// ---------------------------------------------------------------------------
// PgInstanceStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgInstanceStore {
    pool: DbPool,
}

impl PgInstanceStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstanceStore for PgInstanceStore {
    async fn create(&self, instance: &WorkflowInstance) -> Result<CreateOutcome, StoreError> {
        let row = InstanceRow::try_from(instance)?;
        match instances::insert_instance(&self.pool, &row).await.map_err(backend)? {
            InsertOutcome::Inserted => Ok(CreateOutcome::Created),
            InsertOutcome::Duplicate(existing) => Ok(CreateOutcome::Existing(existing)),
        }
    }

    async fn load(&self, instance_id: Uuid) -> Result<WorkflowInstance, StoreError> {
        match instances::get_instance(&self.pool, instance_id).await {
            Ok(row) => row.try_into(),
            Err(DbError::NotFound) => Err(StoreError::NotFound(instance_id)),
            Err(e) => Err(backend(e)),
        }
    }

    async fn save(
        &self,
        instance: &WorkflowInstance,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let next_version = expected_version + 1;
        let mut row = InstanceRow::try_from(instance)?;
        row.version = i64::try_from(next_version).map_err(|e| corrupt("version", e))?;
        let expected = i64::try_from(expected_version).map_err(|e| corrupt("version", e))?;

        if instances::update_instance(&self.pool, &row, expected)
            .await
            .map_err(backend)?
        {
            return Ok(next_version);
        }

        let current = self.load(instance.id).await?;
        Err(StoreError::Conflict {
            instance_id: instance.id,
            expected: expected_version,
            actual: current.version,
        })
    }

    async fn claim(
        &self,
        instance_id: Uuid,
        from: &[InstanceStatus],
        to: InstanceStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowInstance>, StoreError> {
        let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let row = instances::transition_status(&self.pool, instance_id, &from, to.as_str(), now)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => {
                // Distinguish "wrong status" from "no such instance".
                self.load(instance_id).await?;
                Ok(None)
            }
        }
    }

    async fn list_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        instances::list_stale(&self.pool, cutoff, limit)
            .await
            .map_err(backend)?
            .into_iter()
            .map(WorkflowInstance::try_from)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// PgPlanStore
// ---------------------------------------------------------------------------

/// Plans never change once stored, so fetched versions are cached for the
/// life of the process.
pub struct PgPlanStore {
    pool: DbPool,
    cache: RwLock<HashMap<PlanVersion, Arc<Plan>>>,
}

impl PgPlanStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn remember(&self, plan: Plan) -> Arc<Plan> {
        let plan = Arc::new(plan);
        self.cache
            .write()
            .await
            .entry(plan.version())
            .or_insert(plan)
            .clone()
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn put(&self, plan: Plan) -> Result<Arc<Plan>, StoreError> {
        let version = plan.version();
        let row = PlanRow {
            graph_id: version.graph_id,
            version: db_version(version.version)?,
            name: plan.name().to_owned(),
            enabled: plan.enabled(),
            plan: serde_json::to_value(&plan).map_err(|e| corrupt("plan", e))?,
            created_at: Utc::now(),
        };
        plans::insert_plan(&self.pool, &row).await.map_err(backend)?;
        // Re-read so a pre-existing row wins over what we tried to insert.
        self.get(version).await
    }

    async fn get(&self, version: PlanVersion) -> Result<Arc<Plan>, StoreError> {
        if let Some(plan) = self.cache.read().await.get(&version) {
            return Ok(plan.clone());
        }

        let row = match plans::get_plan(&self.pool, version.graph_id, db_version(version.version)?)
            .await
        {
            Ok(row) => row,
            Err(DbError::NotFound) => return Err(StoreError::PlanNotFound(version)),
            Err(e) => return Err(backend(e)),
        };
        debug!(plan = %version, "plan cache miss");
        Ok(self.remember(plan_from_row(row)?).await)
    }

    async fn latest(&self, graph_id: Uuid) -> Result<Arc<Plan>, StoreError> {
        match plans::latest_plan(&self.pool, graph_id).await {
            Ok(row) => Ok(self.remember(plan_from_row(row)?).await),
            Err(DbError::NotFound) => Err(StoreError::GraphNotFound(graph_id)),
            Err(e) => Err(backend(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// PgScheduler
// ---------------------------------------------------------------------------

/// Ready set stored in the `wakeups` table. Polling deletes due rows with
/// `FOR UPDATE SKIP LOCKED`, so concurrent workers take disjoint batches.
#[derive(Clone)]
pub struct PgScheduler {
    pool: DbPool,
}

impl PgScheduler {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn scheduler_backend(err: DbError) -> SchedulerError {
    SchedulerError::Backend(err.to_string())
}

#[async_trait]
impl Scheduler for PgScheduler {
    async fn schedule_at(
        &self,
        instance_id: Uuid,
        resume_at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        wakeups::upsert_wakeup(&self.pool, instance_id, resume_at)
            .await
            .map_err(scheduler_backend)
    }

    async fn poll_ready(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, SchedulerError> {
        let due = wakeups::take_due(&self.pool, now, POLL_BATCH)
            .await
            .map_err(scheduler_backend)?;
        Ok(due.into_iter().map(|row| row.instance_id).collect())
    }

    async fn cancel(&self, instance_id: Uuid) -> Result<(), SchedulerError> {
        wakeups::delete_wakeup(&self.pool, instance_id)
            .await
            .map_err(scheduler_backend)
    }

    async fn pending(&self, instance_id: Uuid) -> Result<Option<WakeUp>, SchedulerError> {
        let row = wakeups::get_wakeup(&self.pool, instance_id)
            .await
            .map_err(scheduler_backend)?;
        Ok(row.map(|row| WakeUp {
            instance_id: row.instance_id,
            resume_at: row.resume_at,
        }))
    }
}

// ---------------------------------------------------------------------------
// PgAuditRecorder
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgAuditRecorder {
    pool: DbPool,
}

impl PgAuditRecorder {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn audit_backend(err: impl std::fmt::Display) -> AuditError {
    AuditError::Backend(err.to_string())
}

#[async_trait]
impl AuditRecorder for PgAuditRecorder {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let outcome = serde_json::to_value(&entry.outcome).map_err(audit_backend)?;
        audit::insert_audit_entry(
            &self.pool,
            entry.instance_id,
            &entry.node_id,
            entry.timestamp,
            outcome,
            &entry.detail,
        )
        .await
        .map_err(audit_backend)
    }

    async fn history(&self, instance_id: Uuid) -> Result<Vec<AuditEntry>, AuditError> {
        audit::list_audit_entries(&self.pool, instance_id)
            .await
            .map_err(audit_backend)?
            .into_iter()
            .map(|row| {
                Ok(AuditEntry {
                    instance_id: row.instance_id,
                    node_id: row.node_id,
                    timestamp: row.recorded_at,
                    outcome: serde_json::from_value(row.outcome).map_err(audit_backend)?,
                    detail: row.detail,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::config::EngineConfig;
    use crate::models::{Graph, Node, NodeKind, TriggerKind};

    #[test]
    fn instance_survives_the_row_conversion() {
        let graph = Graph::new(
            "g",
            vec![Node::new("t", NodeKind::Trigger { kind: TriggerKind::TagAdded })],
            vec![],
        );
        let plan = compile(&graph, &EngineConfig::default()).unwrap();
        let mut instance = WorkflowInstance::new(
            &plan,
            EventContext::new(serde_json::json!({ "tags": ["vip"] })),
            Some("evt-7".into()),
            Utc::now(),
        );
        instance.record_attempt("t");
        instance.version = 4;

        let row = InstanceRow::try_from(&instance).unwrap();
        assert_eq!(row.status, "waiting_delay");
        assert_eq!(row.attempts, serde_json::json!({ "t": 1 }));

        let back = WorkflowInstance::try_from(row).unwrap();
        assert_eq!(back, instance);
    }

    #[test]
    fn unknown_status_is_reported_as_corrupt() {
        let graph = Graph::new(
            "g",
            vec![Node::new("t", NodeKind::Trigger { kind: TriggerKind::Manual })],
            vec![],
        );
        let plan = compile(&graph, &EngineConfig::default()).unwrap();
        let instance = WorkflowInstance::new(&plan, EventContext::default(), None, Utc::now());
        let mut row = InstanceRow::try_from(&instance).unwrap();
        row.status = "paused".into();

        assert!(matches!(
            WorkflowInstance::try_from(row),
            Err(StoreError::Corrupt(_))
        ));
    }
}
