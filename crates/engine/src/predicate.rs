//! Condition predicates and their evaluation against an event context.
//!
//! Evaluation is pure and total: every predicate yields either a boolean or
//! [`Evaluation::Unresolved`] with a reason. The engine routes unresolved
//! predicates down the `false` branch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use nodes::EventContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// The event's `tags` array contains `tag`.
    TagPresent { tag: String },
    /// The value at `field` (dot path) equals `value`.
    FieldEquals { field: String, value: Value },
    /// A value is present at `field`. Never unresolved.
    FieldExists { field: String },
    Not { predicate: Box<Predicate> },
    All { predicates: Vec<Predicate> },
    Any { predicates: Vec<Predicate> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Resolved(bool),
    Unresolved(String),
}

impl Evaluation {
    /// Collapse to a branch decision; unresolved takes the `false` branch.
    pub fn as_branch(&self) -> bool {
        matches!(self, Self::Resolved(true))
    }
}

impl Predicate {
    pub fn evaluate(&self, ctx: &EventContext) -> Evaluation {
        match self {
            Self::TagPresent { tag } => match ctx.tags() {
                Some(tags) => Evaluation::Resolved(tags.contains(&tag.as_str())),
                None => Evaluation::Unresolved("event has no `tags` array".into()),
            },
            Self::FieldEquals { field, value } => match ctx.lookup(field) {
                Some(actual) => Evaluation::Resolved(actual == value),
                None => Evaluation::Unresolved(format!("field `{field}` is missing")),
            },
            Self::FieldExists { field } => {
                Evaluation::Resolved(ctx.lookup(field).is_some_and(|v| !v.is_null()))
            }
            Self::Not { predicate } => match predicate.evaluate(ctx) {
                Evaluation::Resolved(b) => Evaluation::Resolved(!b),
                unresolved => unresolved,
            },
            Self::All { predicates } => combine(predicates, ctx, false),
            Self::Any { predicates } => combine(predicates, ctx, true),
        }
    }

    /// Structural checks performed at compile time. Returns the reason on
    /// failure.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::TagPresent { tag } if tag.trim().is_empty() => Err("empty tag".into()),
            Self::FieldEquals { field, .. } | Self::FieldExists { field }
                if field.split('.').any(|segment| segment.is_empty()) =>
            {
                Err(format!("malformed field path `{field}`"))
            }
            Self::Not { predicate } => predicate.validate(),
            Self::All { predicates } | Self::Any { predicates } => {
                predicates.iter().try_for_each(Predicate::validate)
            }
            _ => Ok(()),
        }
    }
}

/// `All` short-circuits on `false`, `Any` on `true`. Otherwise an unresolved
/// member makes the whole combination unresolved.
fn combine(predicates: &[Predicate], ctx: &EventContext, short_circuit_on: bool) -> Evaluation {
    let mut unresolved = None;
    for predicate in predicates {
        match predicate.evaluate(ctx) {
            Evaluation::Resolved(b) if b == short_circuit_on => return Evaluation::Resolved(b),
            Evaluation::Resolved(_) => {}
            Evaluation::Unresolved(reason) => {
                unresolved.get_or_insert(reason);
            }
        }
    }
    match unresolved {
        Some(reason) => Evaluation::Unresolved(reason),
        None => Evaluation::Resolved(!short_circuit_on),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> EventContext {
        EventContext::new(value)
    }

    fn tag(t: &str) -> Predicate {
        Predicate::TagPresent { tag: t.into() }
    }

    #[test]
    fn tag_present_checks_the_tags_array() {
        assert_eq!(tag("vip").evaluate(&ctx(json!({ "tags": ["vip"] }))), Evaluation::Resolved(true));
        assert_eq!(tag("vip").evaluate(&ctx(json!({ "tags": [] }))), Evaluation::Resolved(false));
        assert!(matches!(tag("vip").evaluate(&ctx(json!({}))), Evaluation::Unresolved(_)));
    }

    #[test]
    fn missing_field_is_unresolved_and_takes_false_branch() {
        let p = Predicate::FieldEquals { field: "contact.stage".into(), value: json!("won") };
        let result = p.evaluate(&ctx(json!({ "contact": {} })));
        assert!(matches!(&result, Evaluation::Unresolved(r) if r.contains("contact.stage")));
        assert!(!result.as_branch());
    }

    #[test]
    fn field_equals_compares_json_values() {
        let p = Predicate::FieldEquals { field: "score".into(), value: json!(10) };
        assert_eq!(p.evaluate(&ctx(json!({ "score": 10 }))), Evaluation::Resolved(true));
        assert_eq!(p.evaluate(&ctx(json!({ "score": "10" }))), Evaluation::Resolved(false));
    }

    #[test]
    fn field_exists_is_total() {
        let p = Predicate::FieldExists { field: "email".into() };
        assert_eq!(p.evaluate(&ctx(json!({ "email": "a@b.c" }))), Evaluation::Resolved(true));
        assert_eq!(p.evaluate(&ctx(json!({ "email": null }))), Evaluation::Resolved(false));
        assert_eq!(p.evaluate(&ctx(json!({}))), Evaluation::Resolved(false));
    }

    #[test]
    fn not_propagates_unresolved() {
        let p = Predicate::Not { predicate: Box::new(tag("vip")) };
        assert_eq!(p.evaluate(&ctx(json!({ "tags": [] }))), Evaluation::Resolved(true));
        assert!(matches!(p.evaluate(&ctx(json!({}))), Evaluation::Unresolved(_)));
    }

    #[test]
    fn all_and_any_short_circuit_before_unresolved_members() {
        let missing = Predicate::FieldEquals { field: "nope".into(), value: json!(1) };
        let event = ctx(json!({ "tags": ["vip"] }));

        let all = Predicate::All { predicates: vec![tag("cold"), missing.clone()] };
        assert_eq!(all.evaluate(&event), Evaluation::Resolved(false));

        let any = Predicate::Any { predicates: vec![missing.clone(), tag("vip")] };
        assert_eq!(any.evaluate(&event), Evaluation::Resolved(true));

        let all_unresolved = Predicate::All { predicates: vec![tag("vip"), missing] };
        assert!(matches!(all_unresolved.evaluate(&event), Evaluation::Unresolved(_)));

        assert_eq!(
            Predicate::All { predicates: vec![] }.evaluate(&event),
            Evaluation::Resolved(true)
        );
        assert_eq!(
            Predicate::Any { predicates: vec![] }.evaluate(&event),
            Evaluation::Resolved(false)
        );
    }

    #[test]
    fn validate_rejects_malformed_paths_in_nested_predicates() {
        let p = Predicate::Any {
            predicates: vec![tag("vip"), Predicate::FieldExists { field: "a..b".into() }],
        };
        assert!(p.validate().unwrap_err().contains("a..b"));
        assert!(tag(" ").validate().is_err());
    }
}
