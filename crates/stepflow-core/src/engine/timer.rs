//! Timer service: re-drives suspended instances when they come due.
//!
//! Sleeps and wait deadlines have no parked task; the timer polls
//! `list_due_instances` on an interval and spawns a drive for each hit.
//! Driving an instance that turns out not to be ready is harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::repository::journal::JournalRepository;

use super::scheduler::Scheduler;

/// Interval poller over due instances.
pub struct TimerService<R: JournalRepository + 'static> {
    repo: Arc<R>,
    scheduler: Arc<Scheduler<R>>,
    poll_interval: Duration,
}

impl<R: JournalRepository + 'static> TimerService<R> {
    pub fn new(repo: Arc<R>, scheduler: Arc<Scheduler<R>>, poll_interval: Duration) -> Self {
        Self {
            repo,
            scheduler,
            poll_interval,
        }
    }

    /// Poll until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "timer service started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("timer service stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    async fn poll_once(&self) {
        let due = match self.repo.list_due_instances(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list due instances");
                return;
            }
        };

        for instance in due {
            let scheduler = Arc::clone(&self.scheduler);
            let id = instance.id;
            tokio::spawn(async move {
                if let Err(e) = scheduler.drive(id).await {
                    tracing::error!(instance_id = %id, error = %e, "timer-triggered drive failed");
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::WorkflowRegistry;
    use crate::repository::journal::JournalRepository as _;
    use crate::repository::memory::MemoryJournalRepository;
    use serde_json::json;
    use stepflow_types::instance::{InstanceStatus, WorkflowInstance};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_timer_redrive_completes_sleeping_instance() {
        let repo = Arc::new(MemoryJournalRepository::new());
        let registry = Arc::new(WorkflowRegistry::new());
        registry.register("nap", |ctx, _params| async move {
            ctx.sleep("pause", Duration::from_millis(40)).await?;
            Ok(json!("woke"))
        });
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&repo), Arc::clone(&registry)));

        let id = Uuid::now_v7();
        repo.create_instance(&WorkflowInstance::new(id, "nap", json!({})))
            .await
            .unwrap();
        scheduler.drive(id).await.unwrap();
        assert_eq!(
            repo.get_instance(&id).await.unwrap().unwrap().status,
            InstanceStatus::Sleeping
        );

        let shutdown = CancellationToken::new();
        let timer = TimerService::new(
            Arc::clone(&repo),
            Arc::clone(&scheduler),
            Duration::from_millis(10),
        );
        let handle = tokio::spawn(timer.run(shutdown.clone()));

        // The poller should pick the instance up once its wake time passes.
        let mut status = InstanceStatus::Sleeping;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = repo.get_instance(&id).await.unwrap().unwrap().status;
            if status == InstanceStatus::Complete {
                break;
            }
        }
        assert_eq!(status, InstanceStatus::Complete);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
