//! Long-running loops that drive the executor: workers poll the ready set,
//! the sweeper reconciles what the ready set lost.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::WorkerConfig;
use crate::executor::WorkflowExecutor;

/// Polls the scheduler and runs ready instances until cancelled.
pub struct Worker {
    name: String,
    executor: Arc<WorkflowExecutor>,
    config: WorkerConfig,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        executor: Arc<WorkflowExecutor>,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            executor,
            config,
            cancel,
        }
    }

    /// Run the poll loop. Blocks until cancelled.
    ///
    /// A non-empty poll is followed immediately by another one, so a backlog
    /// drains without waiting a full interval per batch.
    pub async fn run(&self) {
        info!(worker = %self.name, interval = ?self.config.poll_interval, "worker started");
        loop {
            let drained = match self.executor.poll_once().await {
                Ok(0) => false,
                Ok(count) => {
                    debug!(worker = %self.name, count, "processed ready instances");
                    true
                }
                Err(e) => {
                    error!(worker = %self.name, error = %e, "poll failed");
                    false
                }
            };

            if drained && !self.cancel.is_cancelled() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.cancel.cancelled() => {
                    info!(worker = %self.name, "worker stopping");
                    return;
                }
            }
        }
    }
}

/// Periodically runs [`WorkflowExecutor::reconcile`].
pub struct Sweeper {
    executor: Arc<WorkflowExecutor>,
    config: WorkerConfig,
    cancel: CancellationToken,
}

impl Sweeper {
    pub fn new(
        executor: Arc<WorkflowExecutor>,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            config,
            cancel,
        }
    }

    /// Run the sweep loop. Blocks until cancelled.
    pub async fn run(&self) {
        let grace = match chrono::Duration::from_std(self.config.grace) {
            Ok(grace) => grace,
            Err(e) => {
                error!(error = %e, "grace period out of range, sweeper disabled");
                self.cancel.cancelled().await;
                return;
            }
        };

        info!(interval = ?self.config.sweep_interval, ?grace, "sweeper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval) => {}
                _ = self.cancel.cancelled() => {
                    info!("sweeper stopping");
                    return;
                }
            }

            if let Err(e) = self.executor.reconcile(grace).await {
                error!(error = %e, "reconciliation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use nodes::mock::MockInvoker;
    use nodes::EventContext;
    use queue::{MemoryScheduler, Scheduler};

    use crate::audit::MemoryAuditRecorder;
    use crate::config::EngineConfig;
    use crate::instance::InstanceStatus;
    use crate::models::{Graph, Node, NodeKind, TriggerKind};
    use crate::store::{InstanceStore, MemoryInstanceStore, MemoryPlanStore};

    #[tokio::test]
    async fn worker_drains_ready_instances_and_stops_on_cancel() {
        let store = Arc::new(MemoryInstanceStore::new());
        let scheduler = Arc::new(MemoryScheduler::new());
        let executor = Arc::new(WorkflowExecutor::new(
            store.clone(),
            Arc::new(MemoryPlanStore::new()),
            scheduler.clone(),
            Arc::new(MemoryAuditRecorder::new()),
            Arc::new(MockInvoker::succeeding()),
            EngineConfig::default(),
        ));

        let graph = Graph::new(
            "manual",
            vec![Node::new("start", NodeKind::Trigger { kind: TriggerKind::Manual })],
            vec![],
        );
        executor.publish(&graph).await.unwrap();
        let id = executor
            .emit(TriggerKind::Manual, graph.id, EventContext::default(), None)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let worker = Worker::new(
            "w0",
            executor.clone(),
            WorkerConfig {
                poll_interval: std::time::Duration::from_millis(10),
                ..WorkerConfig::default()
            },
            cancel.clone(),
        );
        let handle = tokio::spawn(async move { worker.run().await });

        for _ in 0..100 {
            if store.load(id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(store.load(id).await.unwrap().status, InstanceStatus::Succeeded);
        assert!(scheduler.poll_ready(Utc::now()).await.unwrap().is_empty());
    }
}
