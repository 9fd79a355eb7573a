//! The `ActionInvoker` trait, which every side-effect integration must
//! fulfil, and the context handed to it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{ActionError, ActionSpec};

/// The payload of the triggering event an instance was created for.
///
/// Defined here (in the nodes crate) so both the engine's predicate
/// evaluation and the action integrations can read it without a circular
/// dependency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventContext(pub Value);

impl EventContext {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Resolve a dot-separated path such as `contact.stage`.
    ///
    /// Numeric segments index into arrays. Returns `None` when any segment
    /// is missing.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.0, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// The `tags` array of the event, if present and well-formed.
    pub fn tags(&self) -> Option<Vec<&str>> {
        self.0
            .get("tags")?
            .as_array()?
            .iter()
            .map(Value::as_str)
            .collect()
    }
}

/// Everything an invoker needs to perform one node visit.
///
/// `(instance_id, node_id, attempt)` is stable across crash re-dispatch and
/// can serve as an idempotency key at the provider.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub instance_id: Uuid,
    pub node_id: String,
    /// 1-based attempt number for this node visit.
    pub attempt: u32,
    pub event: EventContext,
}

/// Performs the side effect for an action node.
///
/// Implementations must tolerate being called more than once for the same
/// node visit: the engine guarantees at-least-once dispatch with a bounded
/// attempt count, never exactly-once.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn invoke(
        &self,
        action: &ActionSpec,
        ctx: &InvocationContext,
    ) -> Result<(), ActionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let ctx = EventContext::new(json!({
            "contact": { "stage": "qualified", "phones": ["+1", "+2"] }
        }));
        assert_eq!(ctx.lookup("contact.stage"), Some(&json!("qualified")));
        assert_eq!(ctx.lookup("contact.phones.1"), Some(&json!("+2")));
        assert_eq!(ctx.lookup("contact.email"), None);
        assert_eq!(ctx.lookup("contact.stage.deeper"), None);
    }

    #[test]
    fn tags_requires_an_array_of_strings() {
        assert_eq!(
            EventContext::new(json!({ "tags": ["vip", "new"] })).tags(),
            Some(vec!["vip", "new"])
        );
        assert_eq!(EventContext::new(json!({ "tags": [] })).tags(), Some(vec![]));
        assert_eq!(EventContext::new(json!({ "tags": "vip" })).tags(), None);
        assert_eq!(EventContext::new(json!({ "tags": [1] })).tags(), None);
        assert_eq!(EventContext::new(json!({})).tags(), None);
    }
}
