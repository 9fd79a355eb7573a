//! Action kinds and their parameter schemas.
//!
//! Each kind owns its own parameter struct, so the engine never threads an
//! untyped map through execution. The authored JSON form is
//! `{"kind": "send_whatsapp", "params": {"template": "welcome"}}`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ParamError;

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

/// The closed set of side-effecting action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendWhatsapp,
    SendEmail,
    Webhook,
    UpdateRecord,
    AddTag,
    RemoveTag,
    MoveStage,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        Self::SendWhatsapp,
        Self::SendEmail,
        Self::Webhook,
        Self::UpdateRecord,
        Self::AddTag,
        Self::RemoveTag,
        Self::MoveStage,
    ];

    /// Kinds whose side effect is observable twice if re-dispatched after a
    /// crash (a second message, a second HTTP call).
    pub fn is_idempotent_unsafe(self) -> bool {
        matches!(self, Self::SendWhatsapp | Self::SendEmail | Self::Webhook)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SendWhatsapp => "send_whatsapp",
            Self::SendEmail => "send_email",
            Self::Webhook => "webhook",
            Self::UpdateRecord => "update_record",
            Self::AddTag => "add_tag",
            Self::RemoveTag => "remove_tag",
            Self::MoveStage => "move_stage",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Parameter schemas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageParams {
    /// Approved template name at the messaging provider.
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailParams {
    pub subject: String,
    pub template: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookParams {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecordParams {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagParams {
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveStageParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    pub stage: String,
}

// ---------------------------------------------------------------------------
// ActionSpec
// ---------------------------------------------------------------------------

/// An action node's behaviour: the kind plus its typed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum ActionSpec {
    SendWhatsapp(SendMessageParams),
    SendEmail(SendEmailParams),
    Webhook(WebhookParams),
    UpdateRecord(UpdateRecordParams),
    AddTag(TagParams),
    RemoveTag(TagParams),
    MoveStage(MoveStageParams),
}

impl ActionSpec {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::SendWhatsapp(_) => ActionKind::SendWhatsapp,
            Self::SendEmail(_) => ActionKind::SendEmail,
            Self::Webhook(_) => ActionKind::Webhook,
            Self::UpdateRecord(_) => ActionKind::UpdateRecord,
            Self::AddTag(_) => ActionKind::AddTag,
            Self::RemoveTag(_) => ActionKind::RemoveTag,
            Self::MoveStage(_) => ActionKind::MoveStage,
        }
    }

    /// Validate the parameters against the kind's schema.
    ///
    /// Serde already enforces the shape; this checks the values.
    pub fn validate(&self) -> Result<(), ParamError> {
        let kind = self.kind();
        match self {
            Self::SendWhatsapp(p) => {
                non_empty(kind, "template", &p.template)?;
                if let Some(lang) = &p.language {
                    non_empty(kind, "language", lang)?;
                }
            }
            Self::SendEmail(p) => {
                non_empty(kind, "subject", &p.subject)?;
                non_empty(kind, "template", &p.template)?;
            }
            Self::Webhook(p) => {
                if !(p.url.starts_with("https://") || p.url.starts_with("http://")) {
                    return Err(ParamError {
                        kind,
                        field: "url",
                        reason: format!("`{}` is not an http(s) URL", p.url),
                    });
                }
            }
            Self::UpdateRecord(p) => non_empty(kind, "field", &p.field)?,
            Self::AddTag(p) | Self::RemoveTag(p) => non_empty(kind, "tag", &p.tag)?,
            Self::MoveStage(p) => non_empty(kind, "stage", &p.stage)?,
        }
        Ok(())
    }
}

fn non_empty(kind: ActionKind, field: &'static str, value: &str) -> Result<(), ParamError> {
    if value.trim().is_empty() {
        return Err(ParamError {
            kind,
            field,
            reason: "must not be empty".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn authored_json_deserializes_into_typed_params() {
        let spec: ActionSpec = serde_json::from_value(json!({
            "kind": "send_whatsapp",
            "params": { "template": "welcome" }
        }))
        .expect("valid action");

        assert_eq!(spec.kind(), ActionKind::SendWhatsapp);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn unknown_param_shape_is_rejected_by_serde() {
        let result: Result<ActionSpec, _> = serde_json::from_value(json!({
            "kind": "send_email",
            "params": { "template": "x" }
        }));
        assert!(result.is_err(), "missing `subject` must not deserialize");
    }

    #[test]
    fn empty_template_fails_validation() {
        let spec = ActionSpec::SendWhatsapp(SendMessageParams {
            template: "  ".into(),
            language: None,
        });
        let err = spec.validate().unwrap_err();
        assert_eq!(err.field, "template");
        assert_eq!(err.kind, ActionKind::SendWhatsapp);
    }

    #[test]
    fn webhook_requires_http_url() {
        let spec = ActionSpec::Webhook(WebhookParams {
            url: "ftp://example.com".into(),
            method: HttpMethod::Post,
        });
        assert!(matches!(spec.validate(), Err(ParamError { field: "url", .. })));
    }

    #[test]
    fn messaging_kinds_are_flagged_idempotent_unsafe() {
        assert!(ActionKind::SendWhatsapp.is_idempotent_unsafe());
        assert!(ActionKind::Webhook.is_idempotent_unsafe());
        assert!(!ActionKind::AddTag.is_idempotent_unsafe());
    }
}
