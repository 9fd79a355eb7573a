//! Per-kind handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{ActionError, ActionInvoker, ActionKind, ActionSpec, InvocationContext};

/// Routes each action to the handler registered for its kind.
///
/// The registry is itself an [`ActionInvoker`], so the engine only ever sees
/// one invoker regardless of how many integrations are wired in.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ActionInvoker>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous handler.
    pub fn register(mut self, kind: ActionKind, handler: Arc<dyn ActionInvoker>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Register the same handler for every kind.
    pub fn with_fallback(mut self, handler: Arc<dyn ActionInvoker>) -> Self {
        for kind in ActionKind::ALL {
            self.handlers.entry(kind).or_insert_with(|| handler.clone());
        }
        self
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[async_trait]
impl ActionInvoker for HandlerRegistry {
    async fn invoke(
        &self,
        action: &ActionSpec,
        ctx: &InvocationContext,
    ) -> Result<(), ActionError> {
        let kind = action.kind();
        let handler = self.handlers.get(&kind).ok_or_else(|| {
            ActionError::Permanent(format!("no handler registered for action kind '{kind}'"))
        })?;
        debug!(%kind, node_id = %ctx.node_id, attempt = ctx.attempt, "dispatching action");
        handler.invoke(action, ctx).await
    }
}
