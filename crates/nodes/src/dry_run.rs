//! `DryRunInvoker` logs every action instead of performing it.
//!
//! The default handler wired in by the CLI when no real integration is
//! registered for a kind.

use async_trait::async_trait;
use tracing::info;

use crate::{ActionError, ActionInvoker, ActionSpec, InvocationContext};

#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunInvoker;

#[async_trait]
impl ActionInvoker for DryRunInvoker {
    async fn invoke(
        &self,
        action: &ActionSpec,
        ctx: &InvocationContext,
    ) -> Result<(), ActionError> {
        let params = serde_json::to_string(action)
            .map_err(|e| ActionError::Permanent(format!("unserializable params: {e}")))?;
        info!(
            instance_id = %ctx.instance_id,
            node_id = %ctx.node_id,
            attempt = ctx.attempt,
            "dry-run action {params}"
        );
        Ok(())
    }
}
