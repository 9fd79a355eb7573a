//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Compiles graphs into immutable plans and stores them per version.
//! 2. Turns trigger events into instances bound to the latest plan.
//! 3. Drives claimed instances one step at a time against their bound plan,
//!    persisting every transition with a version compare-and-swap.
//! 4. Hands suspended instances (delays, retry back-off) to the scheduler
//!    instead of sleeping on them.
//! 5. Records one audit entry per node visit.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use nodes::{ActionError, ActionInvoker, EventContext, InvocationContext};
use queue::Scheduler;

use crate::audit::{AuditEntry, AuditOutcome, AuditRecorder};
use crate::clock::{Clock, SystemClock};
use crate::compiler::compile;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::instance::{InstanceStatus, WorkflowInstance};
use crate::models::{Graph, TriggerKind};
use crate::plan::{Plan, Step};
use crate::predicate::Evaluation;
use crate::store::{CreateOutcome, InstanceStore, PlanStore, StoreError};

/// Upper bound on instances examined by one reconciliation pass.
const RECONCILE_BATCH: usize = 500;

// ---------------------------------------------------------------------------
// Step and run results
// ---------------------------------------------------------------------------

/// The result of visiting one node: the instance as it should be persisted
/// and the audit entry describing the visit.
#[derive(Debug, Clone)]
pub struct Stepped {
    pub instance: WorkflowInstance,
    pub audit: AuditEntry,
}

/// How a call to [`WorkflowExecutor::run_instance`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The instance was not ready or another worker claimed it first.
    Skipped,
    /// Suspended until `resume_at`; a wake-up has been scheduled.
    Suspended { resume_at: DateTime<Utc> },
    /// Reached a terminal status.
    Finished(InstanceStatus),
    /// The instance was cancelled while a step ran; the step's result was
    /// thrown away.
    Discarded,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Drives workflow instances through their compiled plans.
///
/// The executor holds no per-instance state: everything it needs between
/// steps lives in the [`InstanceStore`], so any number of executors (one per
/// worker process) can share the same backends.
pub struct WorkflowExecutor {
    store: Arc<dyn InstanceStore>,
    plans: Arc<dyn PlanStore>,
    scheduler: Arc<dyn Scheduler>,
    audit: Arc<dyn AuditRecorder>,
    invoker: Arc<dyn ActionInvoker>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        plans: Arc<dyn PlanStore>,
        scheduler: Arc<dyn Scheduler>,
        audit: Arc<dyn AuditRecorder>,
        invoker: Arc<dyn ActionInvoker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            plans,
            scheduler,
            audit,
            invoker,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the wall clock, typically with a
    /// [`ManualClock`](crate::clock::ManualClock) in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Authoring side
    // -----------------------------------------------------------------------

    /// Compile `graph` and store the plan under `(graph.id, graph.version)`.
    ///
    /// Publishing a version that is already stored keeps the stored plan, so
    /// instances bound to it never see a different graph.
    #[instrument(skip(self, graph), fields(graph_id = %graph.id, version = graph.version))]
    pub async fn publish(&self, graph: &Graph) -> Result<Arc<Plan>, EngineError> {
        let plan = compile(graph, &self.config)?;
        let stored = self.plans.put(plan.clone()).await?;
        if *stored != plan {
            warn!("plan {} already stored with different content; keeping it", stored.version());
        } else {
            info!("published plan {} ({} nodes)", stored.version(), stored.len());
        }
        Ok(stored)
    }

    /// The most recent plan of a graph.
    pub async fn latest_plan(&self, graph_id: Uuid) -> Result<Arc<Plan>, EngineError> {
        Ok(self.plans.latest(graph_id).await?)
    }

    // -----------------------------------------------------------------------
    // Event intake, inspection and cancellation
    // -----------------------------------------------------------------------

    /// Start an instance of `graph_id` for a trigger event.
    ///
    /// Re-delivering an event with the same `dedupe_key` returns the id of the
    /// instance it already produced.
    #[instrument(skip_all, fields(%graph_id, %trigger))]
    pub async fn emit(
        &self,
        trigger: TriggerKind,
        graph_id: Uuid,
        context: EventContext,
        dedupe_key: Option<String>,
    ) -> Result<Uuid, EngineError> {
        let plan = self.plans.latest(graph_id).await?;
        if !plan.enabled() {
            return Err(EngineError::GraphDisabled(graph_id));
        }
        if plan.trigger() != trigger {
            return Err(EngineError::TriggerMismatch {
                graph_id,
                expected: plan.trigger(),
                got: trigger,
            });
        }

        let now = self.clock.now();
        let instance = WorkflowInstance::new(&plan, context, dedupe_key, now);
        match self.store.create(&instance).await? {
            CreateOutcome::Existing(existing) => {
                info!(instance_id = %existing, "duplicate event, returning existing instance");
                return Ok(existing);
            }
            CreateOutcome::Created => {}
        }

        self.scheduler.schedule_at(instance.id, now).await?;
        info!(instance_id = %instance.id, plan = %plan.version(), "instance created");
        Ok(instance.id)
    }

    pub async fn instance(&self, instance_id: Uuid) -> Result<WorkflowInstance, EngineError> {
        Ok(self.store.load(instance_id).await?)
    }

    /// The audit trail of an instance, oldest entry first.
    pub async fn audit_trail(&self, instance_id: Uuid) -> Result<Vec<AuditEntry>, EngineError> {
        self.store.load(instance_id).await?;
        Ok(self.audit.history(instance_id).await?)
    }

    /// Cancel a running or waiting instance.
    ///
    /// A step already in flight is allowed to finish; its result is discarded
    /// when it tries to persist.
    #[instrument(skip(self))]
    pub async fn cancel(&self, instance_id: Uuid) -> Result<WorkflowInstance, EngineError> {
        let now = self.clock.now();
        let Some(cancelled) = self.store.cancel(instance_id, now).await? else {
            let current = self.store.load(instance_id).await?;
            return Err(EngineError::NotCancellable {
                instance_id,
                status: current.status,
            });
        };

        self.scheduler.cancel(instance_id).await?;
        self.record(AuditEntry {
            instance_id,
            node_id: cancelled.current_node.clone(),
            timestamp: now,
            outcome: AuditOutcome::Cancelled,
            detail: String::new(),
        })
        .await;
        info!("instance cancelled");
        Ok(cancelled)
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Visit the node `instance` points at and compute the next state.
    ///
    /// Performs the node's side effect (for action nodes) but persists
    /// nothing; the caller owns the compare-and-swap.
    pub async fn step(
        &self,
        plan: &Plan,
        instance: &WorkflowInstance,
    ) -> Result<Stepped, EngineError> {
        let node_id = instance.current_node.clone();
        let step = plan.step(&node_id).ok_or_else(|| EngineError::UnknownNode {
            instance_id: instance.id,
            node_id: node_id.clone(),
            plan: plan.version(),
        })?;

        let now = self.clock.now();
        let mut next = instance.clone();
        next.updated_at = now;
        let mut detail = String::new();

        let outcome = match step {
            Step::Trigger { next: successor } => {
                advance(&mut next, successor.as_deref());
                AuditOutcome::Entered
            }

            Step::Condition {
                predicate,
                on_true,
                on_false,
            } => {
                let evaluation = predicate.evaluate(&instance.context);
                let target = if evaluation.as_branch() { on_true } else { on_false };
                advance(&mut next, Some(target.as_str()));
                match evaluation {
                    Evaluation::Resolved(result) => AuditOutcome::ConditionEvaluated { result },
                    Evaluation::Unresolved(reason) => {
                        warn!(instance_id = %instance.id, node = %node_id, "predicate unresolved, taking false branch: {reason}");
                        detail = reason;
                        AuditOutcome::PredicateUnresolved
                    }
                }
            }

            Step::Action {
                action,
                next: successor,
            } => {
                let previous = instance.attempts_for(&node_id);
                if previous >= self.config.max_attempts {
                    // Every allowed attempt was already dispatched (crash
                    // re-dispatch); never exceed the budget.
                    next.status = InstanceStatus::Failed;
                    next.resume_at = None;
                    detail = format!("attempt budget of {} exhausted", self.config.max_attempts);
                    next.last_error = Some(detail.clone());
                    AuditOutcome::ActionFailed {
                        attempt: previous,
                        permanent: true,
                        retry_at: None,
                    }
                } else {
                    let attempt = next.record_attempt(&node_id);
                    let ctx = InvocationContext {
                        instance_id: instance.id,
                        node_id: node_id.clone(),
                        attempt,
                        event: instance.context.clone(),
                    };

                    debug!(node = %node_id, kind = %action.kind(), attempt, "invoking action");
                    match self.invoker.invoke(action, &ctx).await {
                        Ok(()) => {
                            next.last_error = None;
                            advance(&mut next, successor.as_deref());
                            AuditOutcome::ActionSucceeded { attempt }
                        }
                        Err(err) => {
                            let retry_at = match &err {
                                ActionError::Transient(_) if attempt < self.config.max_attempts => {
                                    let at = now.checked_add_signed(self.config.backoff(attempt));
                                    if at.is_none() {
                                        error!(node = %node_id, attempt, "retry time out of range; not retrying");
                                    }
                                    at
                                }
                                _ => None,
                            };
                            detail = err.reason().to_owned();
                            next.last_error = Some(detail.clone());
                            match retry_at {
                                Some(at) => {
                                    warn!(node = %node_id, attempt, "action failed, retrying at {at}: {err}");
                                    next.status = InstanceStatus::WaitingDelay;
                                    next.resume_at = Some(at);
                                }
                                None => {
                                    error!(node = %node_id, attempt, "action failed: {err}");
                                    next.status = InstanceStatus::Failed;
                                    next.resume_at = None;
                                }
                            }
                            AuditOutcome::ActionFailed {
                                attempt,
                                permanent: !err.is_transient(),
                                retry_at,
                            }
                        }
                    }
                }
            }

            Step::Delay {
                amount,
                unit,
                next: successor,
            } => {
                let resume_at = now + unit.duration(*amount);
                next.current_node = successor.clone();
                next.status = InstanceStatus::WaitingDelay;
                next.resume_at = Some(resume_at);
                detail = format!("{amount} {unit}");
                AuditOutcome::DelayScheduled { resume_at }
            }
        };

        Ok(Stepped {
            instance: next,
            audit: AuditEntry {
                instance_id: instance.id,
                node_id,
                timestamp: now,
                outcome,
                detail,
            },
        })
    }

    /// Claim a ready instance and step it until it suspends or terminates.
    ///
    /// Losing the claim to another worker is not an error. Only contract
    /// violations and backend failures are returned as `Err`.
    #[instrument(skip(self))]
    pub async fn run_instance(&self, instance_id: Uuid) -> Result<RunOutcome, EngineError> {
        let now = self.clock.now();
        let stored = self.store.load(instance_id).await?;
        if stored.status != InstanceStatus::WaitingDelay {
            debug!(status = %stored.status, "not waiting, skipping");
            return Ok(RunOutcome::Skipped);
        }
        if let Some(resume_at) = stored.resume_at.filter(|at| *at > now) {
            // Woken early by a stale entry; put it back where it belongs.
            self.scheduler.schedule_at(instance_id, resume_at).await?;
            return Ok(RunOutcome::Skipped);
        }

        let Some(mut instance) = self
            .store
            .claim(instance_id, &[InstanceStatus::WaitingDelay], InstanceStatus::Running, now)
            .await?
        else {
            debug!("claimed by another worker");
            return Ok(RunOutcome::Skipped);
        };

        let plan = self.plans.get(instance.plan_version).await?;

        loop {
            let Some(step) = plan.step(&instance.current_node) else {
                let err = EngineError::UnknownNode {
                    instance_id,
                    node_id: instance.current_node.clone(),
                    plan: plan.version(),
                };
                self.abort(&instance, &err).await?;
                return Err(err);
            };

            // Persist the attempt before dispatching the side effect, so a
            // crash mid-invocation still counts against the budget.
            if let Step::Action { action, .. } = step {
                let mut intent = instance.clone();
                let attempt = intent.record_attempt(&instance.current_node);
                intent.updated_at = self.clock.now();
                if attempt > 1
                    && instance.last_error.is_none()
                    && action.kind().is_idempotent_unsafe()
                {
                    warn!(
                        node = %instance.current_node,
                        kind = %action.kind(),
                        attempt,
                        "re-dispatching an action whose previous attempt was lost; it may be delivered twice"
                    );
                }
                match self.persist(&intent, instance.version, None).await? {
                    Some(version) => instance.version = version,
                    None => return Ok(RunOutcome::Discarded),
                }
            }

            let Stepped {
                instance: mut next,
                audit,
            } = self.step(&plan, &instance).await?;

            match self.persist(&next, instance.version, Some(&audit)).await? {
                Some(version) => next.version = version,
                None => return Ok(RunOutcome::Discarded),
            }
            self.record(audit).await;
            instance = next;

            match instance.status {
                InstanceStatus::Running => continue,
                InstanceStatus::WaitingDelay => {
                    let resume_at = instance.resume_at.unwrap_or(now);
                    self.scheduler.schedule_at(instance_id, resume_at).await?;
                    debug!(%resume_at, node = %instance.current_node, "suspended");
                    return Ok(RunOutcome::Suspended { resume_at });
                }
                status => {
                    self.scheduler.cancel(instance_id).await?;
                    info!(%status, "instance finished");
                    return Ok(RunOutcome::Finished(status));
                }
            }
        }
    }

    /// Write `instance` with a version check.
    ///
    /// Returns `None` when the instance was cancelled underneath us; the
    /// discarded result is audited as `CancelledPostHoc`, carrying the
    /// outcome of the step that produced it.
    async fn persist(
        &self,
        instance: &WorkflowInstance,
        expected_version: u64,
        step: Option<&AuditEntry>,
    ) -> Result<Option<u64>, EngineError> {
        match self.store.save(instance, expected_version).await {
            Ok(version) => Ok(Some(version)),
            Err(StoreError::Conflict { instance_id, .. }) => {
                let current = self.store.load(instance_id).await?;
                if current.status != InstanceStatus::Cancelled {
                    return Err(EngineError::StoreConflict(instance_id));
                }
                warn!(%instance_id, "instance cancelled during step; discarding result");
                let (node_id, detail) = match step {
                    Some(entry) => (
                        entry.node_id.clone(),
                        serde_json::to_string(&entry.outcome)
                            .map(|outcome| format!("discarded {outcome}"))
                            .unwrap_or_default(),
                    ),
                    None => (instance.current_node.clone(), String::new()),
                };
                self.record(AuditEntry {
                    instance_id,
                    node_id,
                    timestamp: self.clock.now(),
                    outcome: AuditOutcome::CancelledPostHoc,
                    detail,
                })
                .await;
                Ok(None)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Fail an instance whose cursor left its plan, so neither workers nor
    /// the sweep pick it up again.
    async fn abort(&self, instance: &WorkflowInstance, cause: &EngineError) -> Result<(), EngineError> {
        let now = self.clock.now();
        let mut failed = instance.clone();
        failed.status = InstanceStatus::Failed;
        failed.resume_at = None;
        failed.updated_at = now;
        failed.last_error = Some(cause.to_string());

        if self.persist(&failed, instance.version, None).await?.is_some() {
            self.scheduler.cancel(instance.id).await?;
            self.record(AuditEntry {
                instance_id: instance.id,
                node_id: instance.current_node.clone(),
                timestamp: now,
                outcome: AuditOutcome::Aborted,
                detail: cause.to_string(),
            })
            .await;
        }
        Ok(())
    }

    async fn record(&self, entry: AuditEntry) {
        if let Err(err) = self.audit.append(entry).await {
            warn!("failed to record audit entry: {err}");
        }
    }

    // -----------------------------------------------------------------------
    // Worker entry points
    // -----------------------------------------------------------------------

    /// Run every instance the scheduler reports ready. Returns how many were
    /// taken off the ready set.
    ///
    /// A failing instance is logged and does not stop the others.
    pub async fn poll_once(&self) -> Result<usize, EngineError> {
        let ready = self.scheduler.poll_ready(self.clock.now()).await?;
        for instance_id in &ready {
            match self.run_instance(*instance_id).await {
                Ok(outcome) => debug!(%instance_id, ?outcome, "run finished"),
                Err(err) if err.is_fatal() => error!(%instance_id, "engine contract violated: {err}"),
                Err(err) => warn!(%instance_id, "run failed: {err}"),
            }
        }
        Ok(ready.len())
    }

    /// Re-queue instances the scheduler lost track of.
    ///
    /// Waiting instances overdue by more than `grace` get a fresh wake-up if
    /// none is pending. Running instances untouched for `grace` belonged to a
    /// worker that died; they are moved back to waiting and woken now.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, grace: Duration) -> Result<usize, EngineError> {
        let now = self.clock.now();
        let stale = self.store.list_stale(now - grace, RECONCILE_BATCH).await?;
        let mut requeued = 0;

        for instance in stale {
            match instance.status {
                InstanceStatus::WaitingDelay => {
                    if self.scheduler.pending(instance.id).await?.is_none() {
                        let resume_at = instance.resume_at.unwrap_or(now);
                        self.scheduler.schedule_at(instance.id, resume_at).await?;
                        requeued += 1;
                    }
                }
                InstanceStatus::Running => {
                    let reset = self
                        .store
                        .claim(
                            instance.id,
                            &[InstanceStatus::Running],
                            InstanceStatus::WaitingDelay,
                            now,
                        )
                        .await?;
                    if reset.is_some() {
                        warn!(instance_id = %instance.id, "worker lost mid-step; re-queueing");
                        self.scheduler.schedule_at(instance.id, now).await?;
                        requeued += 1;
                    }
                }
                _ => {}
            }
        }

        if requeued > 0 {
            info!(requeued, "reconciliation re-queued instances");
        }
        Ok(requeued)
    }
}

/// Move the cursor to `successor`, or finish the instance when there is none.
fn advance(instance: &mut WorkflowInstance, successor: Option<&str>) {
    instance.resume_at = None;
    match successor {
        Some(node) => {
            instance.current_node = node.to_owned();
            instance.status = InstanceStatus::Running;
        }
        None => instance.status = InstanceStatus::Succeeded,
    }
}
