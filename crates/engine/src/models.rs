//! Authored workflow definitions.
//!
//! A [`Graph`] is what the editor saves: possibly invalid mid-edit, never
//! executed directly. It is serialised to/from JSON at the API boundary and
//! turned into an executable [`Plan`](crate::Plan) by the compiler.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nodes::ActionSpec;

use crate::predicate::Predicate;

// ---------------------------------------------------------------------------
// TriggerKind
// ---------------------------------------------------------------------------

/// What kind of upstream event starts a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Invoked by a user or the API.
    Manual,
    /// An inbound message from a contact.
    MessageReceived,
    LeadStageChanged,
    TagAdded,
    /// A contact has been silent for a configured period.
    Inactivity,
    /// A cron schedule fired.
    Schedule,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Manual => "manual",
            Self::MessageReceived => "message_received",
            Self::LeadStageChanged => "lead_stage_changed",
            Self::TagAdded => "tag_added",
            Self::Inactivity => "inactivity",
            Self::Schedule => "schedule",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// DelayUnit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    #[default]
    Minutes,
    Hours,
    Days,
}

impl DelayUnit {
    pub fn minutes_per_unit(self) -> i64 {
        match self {
            Self::Minutes => 1,
            Self::Hours => 60,
            Self::Days => 24 * 60,
        }
    }

    /// `amount` of this unit as a duration.
    pub fn duration(self, amount: u32) -> Duration {
        Duration::minutes(i64::from(amount) * self.minutes_per_unit())
    }
}

impl fmt::Display for DelayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
        })
    }
}

impl FromStr for DelayUnit {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minutes" => Ok(Self::Minutes),
            "hours"   => Ok(Self::Hours),
            "days"    => Ok(Self::Days),
            other     => Err(format!("unknown delay unit: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// The behaviour of a node. Closed set: workflows are not programs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point. Exactly one per graph.
    Trigger { kind: TriggerKind },
    /// Binary branch on the event context.
    Condition { predicate: Predicate },
    /// Side effect performed through the action invoker.
    Action { action: ActionSpec },
    /// Timed suspension. `unit` falls back to the configured default.
    Delay {
        amount: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<DelayUnit>,
    },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Trigger { .. } => "trigger",
            Self::Condition { .. } => "condition",
            Self::Action { .. } => "action",
            Self::Delay { .. } => "delay",
        }
    }
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within this graph (referenced by edges).
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self { id: id.into(), kind }
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Which outcome of a condition an edge follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    True,
    False,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::True => "true",
            Self::False => "false",
        })
    }
}

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    /// Only set on edges leaving a condition node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            branch: None,
        }
    }

    pub fn branch(from: impl Into<String>, to: impl Into<String>, branch: Branch) -> Self {
        Self {
            branch: Some(branch),
            ..Self::new(from, to)
        }
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

fn default_enabled() -> bool {
    true
}

/// A complete authored workflow definition at one saved version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub id: Uuid,
    /// Authored version, bumped by the editor on every save.
    pub version: u32,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    /// Convenience constructor for testing: version 1, enabled.
    pub fn new(name: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: 1,
            name: name.into(),
            enabled: true,
            nodes,
            edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn authored_json_round_trips_node_shapes() {
        let graph: Graph = serde_json::from_value(json!({
            "id": "6f1c1c1e-5d59-4a4b-9c5e-0c8f0c1d2e3f",
            "version": 3,
            "name": "welcome",
            "nodes": [
                { "id": "start", "type": "trigger", "kind": "manual" },
                { "id": "vip?", "type": "condition",
                  "predicate": { "op": "tag_present", "tag": "vip" } },
                { "id": "wait", "type": "delay", "amount": 1, "unit": "days" },
                { "id": "send", "type": "action",
                  "action": { "kind": "send_whatsapp", "params": { "template": "welcome" } } }
            ],
            "edges": [
                { "from": "start", "to": "vip?" },
                { "from": "vip?", "to": "send", "branch": "true" },
                { "from": "vip?", "to": "wait", "branch": "false" },
                { "from": "wait", "to": "send" }
            ]
        }))
        .expect("valid graph json");

        assert!(graph.enabled, "enabled defaults to true");
        assert_eq!(graph.version, 3);
        assert_eq!(
            graph.nodes[2].kind,
            NodeKind::Delay { amount: 1, unit: Some(DelayUnit::Days) }
        );
        assert_eq!(graph.edges[1].branch, Some(Branch::True));
        assert_eq!(graph.edges[0].branch, None);
    }

    #[test]
    fn unknown_branch_label_is_rejected() {
        let edge: Result<Edge, _> =
            serde_json::from_value(json!({ "from": "a", "to": "b", "branch": "maybe" }));
        assert!(edge.is_err());
    }

    #[test]
    fn delay_units_convert_to_durations() {
        assert_eq!(DelayUnit::Minutes.duration(5), Duration::minutes(5));
        assert_eq!(DelayUnit::Hours.duration(2), Duration::hours(2));
        assert_eq!(DelayUnit::Days.duration(1), Duration::days(1));
    }
}
