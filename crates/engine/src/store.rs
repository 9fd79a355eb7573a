//! Storage contracts for instances and plans, with in-memory implementations.
//!
//! Every instance mutation is a single-row compare-and-swap keyed by the
//! instance id: either on its `version` ([`InstanceStore::save`]) or on its
//! status ([`InstanceStore::claim`]). That is the engine's only
//! synchronisation primitive.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::instance::{InstanceStatus, WorkflowInstance};
use crate::plan::{Plan, PlanVersion};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("instance {0} not found")]
    NotFound(Uuid),

    #[error("no plan stored for graph {0}")]
    GraphNotFound(Uuid),

    #[error("plan {0} not found")]
    PlanNotFound(PlanVersion),

    /// The stored version moved on since the caller loaded the instance.
    #[error("instance {instance_id} is at version {actual}, expected {expected}")]
    Conflict {
        instance_id: Uuid,
        expected: u64,
        actual: u64,
    },

    /// Stored data could not be decoded into domain types.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result of [`InstanceStore::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// An instance with the same `(graph_id, dedupe_key)` already exists.
    Existing(Uuid),
}

/// Durable persistence of in-flight and finished instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert a new instance unless one with the same graph and dedupe key
    /// exists.
    async fn create(&self, instance: &WorkflowInstance) -> Result<CreateOutcome, StoreError>;

    async fn load(&self, instance_id: Uuid) -> Result<WorkflowInstance, StoreError>;

    /// Write `instance` if the stored version equals `expected_version`.
    /// Returns the new version.
    async fn save(
        &self,
        instance: &WorkflowInstance,
        expected_version: u64,
    ) -> Result<u64, StoreError>;

    /// Atomically move the instance from any of `from` to `to`.
    ///
    /// Returns the updated instance, or `None` when its status was not in
    /// `from`. Exactly one of several concurrent callers can win.
    async fn claim(
        &self,
        instance_id: Uuid,
        from: &[InstanceStatus],
        to: InstanceStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowInstance>, StoreError>;

    /// Move a live instance to `Cancelled`. `None` when it was already
    /// terminal.
    async fn cancel(
        &self,
        instance_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowInstance>, StoreError> {
        self.claim(
            instance_id,
            &[InstanceStatus::Running, InstanceStatus::WaitingDelay],
            InstanceStatus::Cancelled,
            now,
        )
        .await
    }

    /// Instances waiting past `resume_at < cutoff`, or running without an
    /// update since `cutoff`.
    async fn list_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowInstance>, StoreError>;
}

/// Compiled plans, stored once per version and never rewritten.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Store a plan. Storing an existing version keeps the original.
    async fn put(&self, plan: Plan) -> Result<Arc<Plan>, StoreError>;

    async fn get(&self, version: PlanVersion) -> Result<Arc<Plan>, StoreError>;

    /// The highest stored version of a graph.
    async fn latest(&self, graph_id: Uuid) -> Result<Arc<Plan>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Instances {
    by_id: HashMap<Uuid, WorkflowInstance>,
    by_dedupe_key: HashMap<(Uuid, String), Uuid>,
}

#[derive(Default)]
pub struct MemoryInstanceStore {
    inner: Mutex<Instances>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn create(&self, instance: &WorkflowInstance) -> Result<CreateOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(key) = &instance.dedupe_key {
            let dedupe = (instance.plan_version.graph_id, key.clone());
            if let Some(existing) = inner.by_dedupe_key.get(&dedupe) {
                return Ok(CreateOutcome::Existing(*existing));
            }
            inner.by_dedupe_key.insert(dedupe, instance.id);
        }
        inner.by_id.insert(instance.id, instance.clone());
        Ok(CreateOutcome::Created)
    }

    async fn load(&self, instance_id: Uuid) -> Result<WorkflowInstance, StoreError> {
        self.inner
            .lock()
            .await
            .by_id
            .get(&instance_id)
            .cloned()
            .ok_or(StoreError::NotFound(instance_id))
    }

    async fn save(
        &self,
        instance: &WorkflowInstance,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .by_id
            .get_mut(&instance.id)
            .ok_or(StoreError::NotFound(instance.id))?;
        if stored.version != expected_version {
            return Err(StoreError::Conflict {
                instance_id: instance.id,
                expected: expected_version,
                actual: stored.version,
            });
        }
        let version = expected_version + 1;
        *stored = WorkflowInstance {
            version,
            ..instance.clone()
        };
        Ok(version)
    }

    async fn claim(
        &self,
        instance_id: Uuid,
        from: &[InstanceStatus],
        to: InstanceStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowInstance>, StoreError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .by_id
            .get_mut(&instance_id)
            .ok_or(StoreError::NotFound(instance_id))?;
        if !from.contains(&stored.status) {
            return Ok(None);
        }
        stored.status = to;
        stored.version += 1;
        stored.updated_at = now;
        Ok(Some(stored.clone()))
    }

    async fn list_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let inner = self.inner.lock().await;
        let mut stale: Vec<WorkflowInstance> = inner
            .by_id
            .values()
            .filter(|i| match i.status {
                InstanceStatus::WaitingDelay => i.resume_at.is_some_and(|at| at < cutoff),
                InstanceStatus::Running => i.updated_at < cutoff,
                _ => false,
            })
            .cloned()
            .collect();
        stale.sort_by_key(|i| i.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }
}

#[derive(Default)]
pub struct MemoryPlanStore {
    plans: RwLock<HashMap<Uuid, BTreeMap<u32, Arc<Plan>>>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn put(&self, plan: Plan) -> Result<Arc<Plan>, StoreError> {
        let version = plan.version();
        let mut plans = self.plans.write().await;
        let stored = plans
            .entry(version.graph_id)
            .or_default()
            .entry(version.version)
            .or_insert_with(|| Arc::new(plan));
        Ok(stored.clone())
    }

    async fn get(&self, version: PlanVersion) -> Result<Arc<Plan>, StoreError> {
        self.plans
            .read()
            .await
            .get(&version.graph_id)
            .and_then(|versions| versions.get(&version.version))
            .cloned()
            .ok_or(StoreError::PlanNotFound(version))
    }

    async fn latest(&self, graph_id: Uuid) -> Result<Arc<Plan>, StoreError> {
        self.plans
            .read()
            .await
            .get(&graph_id)
            .and_then(|versions| versions.values().next_back())
            .cloned()
            .ok_or(StoreError::GraphNotFound(graph_id))
    }
}
