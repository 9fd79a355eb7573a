//! Compiled, immutable execution plans.
//!
//! A [`Plan`] is produced only by [`compile`](crate::compile) and never
//! mutated afterwards. Instances store the [`PlanVersion`] they were created
//! under and are always resolved against that exact plan.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nodes::ActionSpec;

use crate::models::{DelayUnit, TriggerKind};
use crate::predicate::Predicate;

/// Identifies a plan: the graph it was compiled from and that graph's
/// authored version. Two compiles of the same saved graph state share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanVersion {
    pub graph_id: Uuid,
    pub version: u32,
}

impl fmt::Display for PlanVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.graph_id, self.version)
    }
}

/// A node with its successors resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Trigger {
        next: Option<String>,
    },
    Condition {
        predicate: Predicate,
        on_true: String,
        on_false: String,
    },
    Action {
        action: ActionSpec,
        next: Option<String>,
    },
    Delay {
        amount: u32,
        unit: DelayUnit,
        next: String,
    },
}

impl Step {
    /// Every node this step can hand over to.
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Self::Trigger { next } | Self::Action { next, .. } => {
                next.as_deref().into_iter().collect()
            }
            Self::Condition { on_true, on_false, .. } => vec![on_true.as_str(), on_false.as_str()],
            Self::Delay { next, .. } => vec![next.as_str()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    version: PlanVersion,
    name: String,
    enabled: bool,
    trigger: TriggerKind,
    start: String,
    steps: HashMap<String, Step>,
    /// Node ids in topological order.
    order: Vec<String>,
}

impl Plan {
    pub(crate) fn new(
        version: PlanVersion,
        name: String,
        enabled: bool,
        trigger: TriggerKind,
        start: String,
        steps: HashMap<String, Step>,
        order: Vec<String>,
    ) -> Self {
        Self {
            version,
            name,
            enabled,
            trigger,
            start,
            steps,
            order,
        }
    }

    pub fn version(&self) -> PlanVersion {
        self.version
    }

    pub fn graph_id(&self) -> Uuid {
        self.version.graph_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn trigger(&self) -> TriggerKind {
        self.trigger
    }

    /// The trigger node's id.
    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn step(&self, node_id: &str) -> Option<&Step> {
        self.steps.get(node_id)
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
