//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use nodes::ParamError;
use queue::SchedulerError;

use crate::audit::AuditError;
use crate::instance::InstanceStatus;
use crate::models::{Branch, TriggerKind};
use crate::plan::PlanVersion;
use crate::store::StoreError;

/// Structural defects in an authored graph. Each names the offending node or
/// edge; a graph that produces one never becomes a runnable plan.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the graph.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    #[error("graph has no trigger node")]
    MissingTrigger,

    #[error("graph has more than one trigger node: '{first}' and '{second}'")]
    MultipleTriggers { first: String, second: String },

    #[error("trigger '{node_id}' must not have incoming edges (edge from '{from}')")]
    TriggerHasIncomingEdge { node_id: String, from: String },

    #[error("node '{node_id}' is not reachable from the trigger")]
    Unreachable { node_id: String },

    /// Some nodes could not be topologically ordered.
    #[error("graph contains a cycle through node '{node_id}'")]
    CycleDetected { node_id: String },

    #[error("condition '{node_id}' has no '{branch}' edge")]
    MissingBranch { node_id: String, branch: Branch },

    #[error("condition '{node_id}' has more than one '{branch}' edge")]
    DuplicateBranch { node_id: String, branch: Branch },

    #[error("edge '{from}' -> '{to}' leaves a condition but has no branch label")]
    UnlabeledConditionEdge { from: String, to: String },

    #[error("edge '{from}' -> '{to}' carries a branch label but '{from}' is not a condition")]
    UnexpectedBranchLabel { from: String, to: String },

    #[error("{kind} node '{node_id}' has {count} outgoing edges (at most {max} allowed)")]
    TooManySuccessors {
        node_id: String,
        kind: &'static str,
        count: usize,
        max: usize,
    },

    #[error("delay node '{node_id}' must have exactly one outgoing edge")]
    DelayWithoutSuccessor { node_id: String },

    #[error("delay node '{node_id}' is invalid: {reason}")]
    InvalidDelay { node_id: String, reason: String },

    #[error("condition '{node_id}' has an invalid predicate: {reason}")]
    InvalidPredicate { node_id: String, reason: String },

    #[error("action '{node_id}': {source}")]
    InvalidActionParams {
        node_id: String,
        #[source]
        source: ParamError,
    },
}

/// Errors produced by the workflow engine outside of compilation.
///
/// Action failures, unresolved predicates and post-hoc cancellation are not
/// errors: they are reduced to an instance status plus an audit entry.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("instance {0} not found")]
    InstanceNotFound(Uuid),

    #[error("no compiled plan for graph {0}")]
    GraphNotFound(Uuid),

    #[error("plan {0} not found")]
    PlanNotFound(PlanVersion),

    #[error("graph {0} is disabled")]
    GraphDisabled(Uuid),

    #[error("graph {graph_id} is started by `{expected}`, not `{got}`")]
    TriggerMismatch {
        graph_id: Uuid,
        expected: TriggerKind,
        got: TriggerKind,
    },

    #[error("instance {instance_id} is {status} and cannot be cancelled")]
    NotCancellable {
        instance_id: Uuid,
        status: InstanceStatus,
    },

    /// Optimistic concurrency violation; the step was discarded.
    #[error("instance {0} was modified concurrently; step discarded")]
    StoreConflict(Uuid),

    /// Contract violation: a compiled plan never lacks a node its instances
    /// point at.
    #[error("instance {instance_id} points at node '{node_id}' absent from plan {plan}")]
    UnknownNode {
        instance_id: Uuid,
        node_id: String,
        plan: PlanVersion,
    },

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("audit error: {0}")]
    Audit(#[from] AuditError),
}

impl EngineError {
    /// Errors that indicate a bug rather than an operational condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnknownNode { .. })
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::InstanceNotFound(id),
            StoreError::GraphNotFound(id) => Self::GraphNotFound(id),
            StoreError::PlanNotFound(version) => Self::PlanNotFound(version),
            StoreError::Conflict { instance_id, .. } => Self::StoreConflict(instance_id),
            other => Self::Store(other),
        }
    }
}
