use std::sync::Arc;

use engine::WorkflowExecutor;

pub mod events;
pub mod instances;
pub mod workflows;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<WorkflowExecutor>,
}

impl AppState {
    pub fn new(executor: Arc<WorkflowExecutor>) -> Self {
        Self { executor }
    }
}
