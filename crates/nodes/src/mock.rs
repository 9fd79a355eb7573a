//! `MockInvoker`: a test double for `ActionInvoker`.
//!
//! Useful in unit and integration tests where a real integration is either
//! unavailable or irrelevant.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{ActionError, ActionInvoker, ActionSpec, InvocationContext};

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub action: ActionSpec,
    pub ctx: InvocationContext,
}

/// A mock invoker that records every call it receives and replays a
/// programmer-specified script of results.
///
/// Once the script is exhausted every call returns `fallback`.
pub struct MockInvoker {
    script: Mutex<VecDeque<Result<(), ActionError>>>,
    fallback: Result<(), ActionError>,
    /// All invocations seen by this invoker (in call order).
    pub calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockInvoker {
    fn with_fallback(fallback: Result<(), ActionError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always succeeds.
    pub fn succeeding() -> Self {
        Self::with_fallback(Ok(()))
    }

    /// Always fails with a `Transient` error.
    pub fn failing_transient(msg: impl Into<String>) -> Self {
        Self::with_fallback(Err(ActionError::Transient(msg.into())))
    }

    /// Always fails with a `Permanent` error.
    pub fn failing_permanent(msg: impl Into<String>) -> Self {
        Self::with_fallback(Err(ActionError::Permanent(msg.into())))
    }

    /// Queue `result` to be returned before the fallback kicks in.
    pub fn then(self, result: Result<(), ActionError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    /// Number of times this invoker has been called.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Snapshot of every recorded call.
    pub fn recorded(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionInvoker for MockInvoker {
    async fn invoke(
        &self,
        action: &ActionSpec,
        ctx: &InvocationContext,
    ) -> Result<(), ActionError> {
        self.calls.lock().unwrap().push(MockCall {
            action: action.clone(),
            ctx: ctx.clone(),
        });

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}
