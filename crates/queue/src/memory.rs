//! In-process scheduler backed by an ordered set.
//!
//! Suitable for tests and single-process deployments; the reconciliation
//! sweep in the engine re-populates it from persisted instance state after a
//! restart.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::trace;
use uuid::Uuid;

use crate::{Scheduler, SchedulerError, WakeUp};

#[derive(Default)]
struct Inner {
    by_time: BTreeSet<(DateTime<Utc>, Uuid)>,
    by_id: HashMap<Uuid, DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryScheduler {
    inner: Mutex<Inner>,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending wake-ups.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Scheduler for MemoryScheduler {
    async fn schedule_at(
        &self,
        instance_id: Uuid,
        resume_at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.by_id.insert(instance_id, resume_at) {
            inner.by_time.remove(&(previous, instance_id));
        }
        inner.by_time.insert((resume_at, instance_id));
        trace!(%instance_id, %resume_at, "wake-up scheduled");
        Ok(())
    }

    async fn poll_ready(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, SchedulerError> {
        let mut inner = self.inner.lock().await;
        let due: Vec<(DateTime<Utc>, Uuid)> = inner
            .by_time
            .iter()
            .take_while(|(resume_at, _)| *resume_at <= now)
            .copied()
            .collect();

        for entry in &due {
            inner.by_time.remove(entry);
            inner.by_id.remove(&entry.1);
        }
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn cancel(&self, instance_id: Uuid) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        if let Some(resume_at) = inner.by_id.remove(&instance_id) {
            inner.by_time.remove(&(resume_at, instance_id));
        }
        Ok(())
    }

    async fn pending(&self, instance_id: Uuid) -> Result<Option<WakeUp>, SchedulerError> {
        let inner = self.inner.lock().await;
        Ok(inner.by_id.get(&instance_id).map(|&resume_at| WakeUp {
            instance_id,
            resume_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn not_ready_before_resume_at() {
        let scheduler = MemoryScheduler::new();
        let now = Utc::now();
        let id = Uuid::new_v4();
        scheduler.schedule_at(id, now + Duration::minutes(5)).await.unwrap();

        let early = scheduler
            .poll_ready(now + Duration::minutes(5) - Duration::seconds(1))
            .await
            .unwrap();
        assert!(early.is_empty());

        let on_time = scheduler.poll_ready(now + Duration::minutes(5)).await.unwrap();
        assert_eq!(on_time, vec![id]);
    }

    #[tokio::test]
    async fn poll_returns_oldest_first_and_removes_entries() {
        let scheduler = MemoryScheduler::new();
        let now = Utc::now();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        scheduler.schedule_at(b, now - Duration::seconds(1)).await.unwrap();
        scheduler.schedule_at(a, now - Duration::seconds(10)).await.unwrap();
        scheduler.schedule_at(c, now + Duration::hours(1)).await.unwrap();

        assert_eq!(scheduler.poll_ready(now).await.unwrap(), vec![a, b]);
        assert!(scheduler.poll_ready(now).await.unwrap().is_empty());
        assert_eq!(scheduler.len().await, 1);
    }

    #[tokio::test]
    async fn rescheduling_replaces_the_pending_wake_up() {
        let scheduler = MemoryScheduler::new();
        let now = Utc::now();
        let id = Uuid::new_v4();
        scheduler.schedule_at(id, now).await.unwrap();
        scheduler.schedule_at(id, now + Duration::days(1)).await.unwrap();

        assert!(scheduler.poll_ready(now).await.unwrap().is_empty());
        let pending = scheduler.pending(id).await.unwrap().expect("still pending");
        assert_eq!(pending.resume_at, now + Duration::days(1));
    }

    #[tokio::test]
    async fn cancel_removes_from_future_polls() {
        let scheduler = MemoryScheduler::new();
        let now = Utc::now();
        let id = Uuid::new_v4();
        scheduler.schedule_at(id, now).await.unwrap();
        scheduler.cancel(id).await.unwrap();
        scheduler.cancel(id).await.unwrap();

        assert!(scheduler.poll_ready(now).await.unwrap().is_empty());
        assert!(scheduler.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_pollers_never_receive_the_same_instance() {
        let scheduler = Arc::new(MemoryScheduler::new());
        let now = Utc::now();
        let id = Uuid::new_v4();
        scheduler.schedule_at(id, now).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.poll_ready(now).await.unwrap() })
            })
            .collect();

        let mut delivered = 0;
        for handle in handles {
            delivered += handle.await.unwrap().len();
        }
        assert_eq!(delivered, 1);
    }
}
