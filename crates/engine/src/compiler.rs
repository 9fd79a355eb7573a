//! Graph compilation. Run this before persisting or executing a workflow.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the graph.
//! 2. Every edge must reference valid node IDs (both `from` and `to`).
//! 3. Exactly one trigger node, with no incoming edges.
//! 4. Per-kind successor shape: conditions have one `true` and one `false`
//!    edge; triggers and actions at most one edge; delays exactly one; branch
//!    labels appear only on condition edges.
//! 5. The directed graph must be acyclic (topological sort must succeed).
//! 6. Every node is reachable from the trigger.
//! 7. Delay amounts, predicates and action parameters are well-formed.
//!
//! Returns an immutable [`Plan`] on success.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::config::EngineConfig;
use crate::error::CompileError;
use crate::models::{Branch, Edge, Graph, NodeKind, TriggerKind};
use crate::plan::{Plan, PlanVersion, Step};

/// Longest delay a single node may request.
pub const MAX_DELAY_DAYS: i64 = 366;

/// Compile `graph` into an executable plan.
///
/// # Errors
/// The first violated rule, as a [`CompileError`] naming the offending node
/// or edge. No partial plan is ever returned.
pub fn compile(graph: &Graph, config: &EngineConfig) -> Result<Plan, CompileError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &graph.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(CompileError::DuplicateNodeId(node.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate edge endpoints
    // -----------------------------------------------------------------------
    for edge in &graph.edges {
        if !seen_ids.contains(edge.from.as_str()) {
            return Err(CompileError::UnknownNodeReference {
                node_id: edge.from.clone(),
                side: "from",
            });
        }
        if !seen_ids.contains(edge.to.as_str()) {
            return Err(CompileError::UnknownNodeReference {
                node_id: edge.to.clone(),
                side: "to",
            });
        }
    }

    // -----------------------------------------------------------------------
    // 3. Exactly one trigger, nothing pointing at it
    // -----------------------------------------------------------------------
    let (trigger_id, trigger_kind) = find_trigger(graph)?;
    if let Some(edge) = graph.edges.iter().find(|e| e.to == trigger_id) {
        return Err(CompileError::TriggerHasIncomingEdge {
            node_id: trigger_id.to_owned(),
            from: edge.from.clone(),
        });
    }

    // -----------------------------------------------------------------------
    // 4. Successor shape per node kind
    // -----------------------------------------------------------------------
    let mut outgoing: HashMap<&str, Vec<&Edge>> = HashMap::new();
    for edge in &graph.edges {
        outgoing.entry(edge.from.as_str()).or_default().push(edge);
    }

    let mut steps: HashMap<String, Step> = HashMap::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        let edges = outgoing.get(node.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let step = resolve_step(&node.id, &node.kind, edges, config)?;
        steps.insert(node.id.clone(), step);
    }

    // -----------------------------------------------------------------------
    // 5. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let order = topological_order(graph)?;

    // -----------------------------------------------------------------------
    // 6. Reachability from the trigger
    // -----------------------------------------------------------------------
    let mut reachable: HashSet<&str> = HashSet::from([trigger_id]);
    let mut frontier: VecDeque<&str> = VecDeque::from([trigger_id]);
    while let Some(node_id) = frontier.pop_front() {
        for successor in steps[node_id].successors() {
            if reachable.insert(successor) {
                frontier.push_back(successor);
            }
        }
    }
    if let Some(orphan) = order.iter().find(|id| !reachable.contains(id.as_str())) {
        return Err(CompileError::Unreachable {
            node_id: orphan.clone(),
        });
    }

    Ok(Plan::new(
        PlanVersion {
            graph_id: graph.id,
            version: graph.version,
        },
        graph.name.clone(),
        graph.enabled,
        trigger_kind,
        trigger_id.to_owned(),
        steps,
        order,
    ))
}

fn find_trigger(graph: &Graph) -> Result<(&str, TriggerKind), CompileError> {
    let mut found: Option<(&str, TriggerKind)> = None;
    for node in &graph.nodes {
        if let NodeKind::Trigger { kind } = node.kind {
            if let Some((first, _)) = found {
                return Err(CompileError::MultipleTriggers {
                    first: first.to_owned(),
                    second: node.id.clone(),
                });
            }
            found = Some((node.id.as_str(), kind));
        }
    }
    found.ok_or(CompileError::MissingTrigger)
}

fn resolve_step(
    node_id: &str,
    kind: &NodeKind,
    edges: &[&Edge],
    config: &EngineConfig,
) -> Result<Step, CompileError> {
    if !matches!(kind, NodeKind::Condition { .. }) {
        if let Some(edge) = edges.iter().find(|e| e.branch.is_some()) {
            return Err(CompileError::UnexpectedBranchLabel {
                from: edge.from.clone(),
                to: edge.to.clone(),
            });
        }
    }

    match kind {
        NodeKind::Trigger { .. } => Ok(Step::Trigger {
            next: single_successor(node_id, kind, edges)?,
        }),

        NodeKind::Condition { predicate } => {
            predicate
                .validate()
                .map_err(|reason| CompileError::InvalidPredicate {
                    node_id: node_id.to_owned(),
                    reason,
                })?;
            let on_true = branch_target(node_id, edges, Branch::True)?;
            let on_false = branch_target(node_id, edges, Branch::False)?;
            Ok(Step::Condition {
                predicate: predicate.clone(),
                on_true,
                on_false,
            })
        }

        NodeKind::Action { action } => {
            action
                .validate()
                .map_err(|source| CompileError::InvalidActionParams {
                    node_id: node_id.to_owned(),
                    source,
                })?;
            Ok(Step::Action {
                action: action.clone(),
                next: single_successor(node_id, kind, edges)?,
            })
        }

        NodeKind::Delay { amount, unit } => {
            let unit = unit.unwrap_or(config.default_delay_unit);
            if *amount == 0 {
                return Err(CompileError::InvalidDelay {
                    node_id: node_id.to_owned(),
                    reason: "amount must be at least 1".into(),
                });
            }
            if i64::from(*amount) * unit.minutes_per_unit() > MAX_DELAY_DAYS * 24 * 60 {
                return Err(CompileError::InvalidDelay {
                    node_id: node_id.to_owned(),
                    reason: format!("{amount} {unit} exceeds {MAX_DELAY_DAYS} days"),
                });
            }
            let next = single_successor(node_id, kind, edges)?.ok_or_else(|| {
                CompileError::DelayWithoutSuccessor {
                    node_id: node_id.to_owned(),
                }
            })?;
            Ok(Step::Delay {
                amount: *amount,
                unit,
                next,
            })
        }
    }
}

fn single_successor(
    node_id: &str,
    kind: &NodeKind,
    edges: &[&Edge],
) -> Result<Option<String>, CompileError> {
    match edges {
        [] => Ok(None),
        [edge] => Ok(Some(edge.to.clone())),
        _ => Err(CompileError::TooManySuccessors {
            node_id: node_id.to_owned(),
            kind: kind.label(),
            count: edges.len(),
            max: 1,
        }),
    }
}

fn branch_target(node_id: &str, edges: &[&Edge], branch: Branch) -> Result<String, CompileError> {
    if let Some(edge) = edges.iter().find(|e| e.branch.is_none()) {
        return Err(CompileError::UnlabeledConditionEdge {
            from: edge.from.clone(),
            to: edge.to.clone(),
        });
    }

    let mut matching = edges.iter().filter(|e| e.branch == Some(branch));
    let target = matching.next().ok_or_else(|| CompileError::MissingBranch {
        node_id: node_id.to_owned(),
        branch,
    })?;
    if matching.next().is_some() {
        return Err(CompileError::DuplicateBranch {
            node_id: node_id.to_owned(),
            branch,
        });
    }
    Ok(target.to.clone())
}

/// Kahn's algorithm over every node, seeded in id order so the result is
/// deterministic.
fn topological_order(graph: &Graph) -> Result<Vec<String>, CompileError> {
    // Build adjacency list and in-degree map.
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();

    for node in &graph.nodes {
        adjacency.entry(node.id.as_str()).or_default();
        in_degree.entry(node.id.as_str()).or_insert(0);
    }

    for edge in &graph.edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
        *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
    }

    // Seed the queue with nodes that have no incoming edges.
    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(graph.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());

        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                if let Some(deg) = in_degree.get_mut(neighbour) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(neighbour);
                    }
                }
            }
        }
    }

    // If we didn't visit every node the graph contains a cycle; name the
    // smallest id still waiting on a predecessor.
    if sorted.len() != graph.nodes.len() {
        let node_id = in_degree
            .iter()
            .find(|(_, &d)| d > 0)
            .map(|(&id, _)| id.to_owned())
            .unwrap_or_default();
        return Err(CompileError::CycleDetected { node_id });
    }

    Ok(sorted)
}
