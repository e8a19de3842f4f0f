//! Instance scheduler: drives the per-instance state machine.
//!
//! `Running -> {Sleeping, WaitingForEvent, Running} -> Complete | Errored
//! | Terminated`. A drive runs the registered workflow function from the
//! top over the instance's journal; finalized directives fast-forward,
//! the first unfinalized one is the resume point. Within one instance
//! drives are serialized by a per-instance async mutex; across instances
//! they are independent.

use std::sync::Arc;

use dashmap::DashMap;
use stepflow_types::error::RepositoryError;
use stepflow_types::instance::InstanceStatus;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::journal::JournalRepository;

use super::context::{RunError, WorkflowContext};
use super::registry::WorkflowRegistry;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No run function registered under the requested name.
    #[error("workflow not registered: {0}")]
    WorkflowNotFound(String),

    /// The caller-supplied instance id was already used.
    #[error("instance id already in use: {0}")]
    DuplicateInstanceId(Uuid),

    /// Unknown instance id.
    #[error("instance not found: {0}")]
    NotFound(Uuid),

    /// Persistence failure.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives instances through their lifecycle.
pub struct Scheduler<R: JournalRepository> {
    repo: Arc<R>,
    registry: Arc<WorkflowRegistry<R>>,
    /// Per-instance drive serialization. Entries are kept for the life of
    /// the process; an instance's lock must stay stable across drives.
    drive_locks: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,
    /// Cooperative cancellation, keyed by instance id.
    cancel_tokens: DashMap<Uuid, CancellationToken>,
}

impl<R: JournalRepository + 'static> Scheduler<R> {
    pub fn new(repo: Arc<R>, registry: Arc<WorkflowRegistry<R>>) -> Self {
        Self {
            repo,
            registry,
            drive_locks: DashMap::new(),
            cancel_tokens: DashMap::new(),
        }
    }

    /// Drive an instance: replay its journal and run until it completes,
    /// suspends, or fails. Idempotent; concurrent calls serialize on the
    /// per-instance lock and the later one fast-forwards.
    pub async fn drive(&self, instance_id: Uuid) -> Result<(), EngineError> {
        let lock = self
            .drive_locks
            .entry(instance_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Register the cancel token before reading the instance: a
        // terminate() that lands after this read is then guaranteed to
        // cancel this drive's token before persisting Terminated.
        let token = self
            .cancel_tokens
            .entry(instance_id)
            .or_insert_with(CancellationToken::new)
            .clone();

        let instance = self
            .repo
            .get_instance(&instance_id)
            .await?
            .ok_or(EngineError::NotFound(instance_id))?;

        if instance.status.is_terminal() {
            return Ok(());
        }

        let Some(run) = self.registry.get(&instance.workflow) else {
            let msg = format!("workflow not registered: {}", instance.workflow);
            self.repo
                .update_instance_status(&instance_id, InstanceStatus::Errored, None, Some(&msg), None)
                .await?;
            return Err(EngineError::WorkflowNotFound(instance.workflow));
        };

        let records = self.repo.list_records(&instance_id).await?;
        let ctx = WorkflowContext::new(
            Arc::clone(&self.repo),
            instance_id,
            token.clone(),
            records,
        );

        if instance.status != InstanceStatus::Running {
            self.repo
                .update_instance_status(&instance_id, InstanceStatus::Running, None, None, None)
                .await?;
        }

        tracing::debug!(
            instance_id = %instance_id,
            workflow = instance.workflow.as_str(),
            "driving instance"
        );

        let result = run(ctx.clone(), instance.params.clone()).await;

        // terminate() may have persisted Terminated while the run
        // function was in flight; its outcome must not overwrite a
        // terminal status. The token is cancelled before Terminated is
        // persisted, so a clean check here means no terminate happened.
        if token.is_cancelled() {
            tracing::debug!(instance_id = %instance_id, "drive outcome discarded after termination");
            return Ok(());
        }

        match result {
            Ok(output) => {
                self.repo
                    .update_instance_status(
                        &instance_id,
                        InstanceStatus::Complete,
                        Some(&output),
                        None,
                        None,
                    )
                    .await?;
                self.cancel_tokens.remove(&instance_id);
                tracing::info!(instance_id = %instance_id, "instance complete");
            }
            Err(RunError::Suspended) => match ctx.suspension() {
                Some((status, wake_at)) => {
                    self.repo
                        .update_instance_status(&instance_id, status, None, None, Some(wake_at))
                        .await?;
                    tracing::debug!(
                        instance_id = %instance_id,
                        status = ?status,
                        wake_at = %wake_at,
                        "instance suspended"
                    );
                }
                // A Suspended error with no open sleep/wait record means
                // the run function fabricated it.
                None => {
                    let msg = "suspended with no suspension point".to_string();
                    self.repo
                        .update_instance_status(
                            &instance_id,
                            InstanceStatus::Errored,
                            None,
                            Some(&msg),
                            None,
                        )
                        .await?;
                    tracing::error!(instance_id = %instance_id, "bogus suspension");
                }
            },
            // terminate() already persisted the status.
            Err(RunError::Terminated) => {
                tracing::debug!(instance_id = %instance_id, "drive ended by termination");
            }
            // A store failure is retryable: leave the status untouched
            // so a later drive picks the instance back up.
            Err(RunError::Repository(e)) => {
                tracing::warn!(
                    instance_id = %instance_id,
                    error = %e,
                    "drive aborted on repository error"
                );
                return Err(EngineError::Repository(e));
            }
            Err(e) => {
                let msg = e.to_string();
                self.repo
                    .update_instance_status(
                        &instance_id,
                        InstanceStatus::Errored,
                        None,
                        Some(&msg),
                        None,
                    )
                    .await?;
                self.cancel_tokens.remove(&instance_id);
                tracing::error!(instance_id = %instance_id, error = msg.as_str(), "instance errored");
            }
        }

        Ok(())
    }

    /// Terminate a non-terminal instance: cancel its in-flight drive
    /// cooperatively and persist the Terminated status. Terminal
    /// instances are left unchanged.
    pub async fn terminate(&self, instance_id: Uuid) -> Result<(), EngineError> {
        let instance = self
            .repo
            .get_instance(&instance_id)
            .await?
            .ok_or(EngineError::NotFound(instance_id))?;

        if instance.status.is_terminal() {
            return Ok(());
        }

        if let Some((_, token)) = self.cancel_tokens.remove(&instance_id) {
            token.cancel();
        }
        self.repo
            .update_instance_status(&instance_id, InstanceStatus::Terminated, None, None, None)
            .await?;

        tracing::info!(instance_id = %instance_id, "instance terminated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::WorkflowRegistry;
    use crate::repository::memory::MemoryJournalRepository;
    use chrono::{DateTime, Utc};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};
    use stepflow_types::event::BufferedEvent;
    use stepflow_types::instance::WorkflowInstance;
    use stepflow_types::journal::{JournalRecord, StepOutcome, WaitResolution};

    /// Delegates to the in-memory store, failing appends on demand.
    struct FlakyRepository {
        inner: MemoryJournalRepository,
        fail_appends: AtomicBool,
    }

    impl JournalRepository for FlakyRepository {
        async fn create_instance(
            &self,
            instance: &WorkflowInstance,
        ) -> Result<(), RepositoryError> {
            self.inner.create_instance(instance).await
        }

        async fn get_instance(
            &self,
            id: &Uuid,
        ) -> Result<Option<WorkflowInstance>, RepositoryError> {
            self.inner.get_instance(id).await
        }

        async fn update_instance_status(
            &self,
            id: &Uuid,
            status: InstanceStatus,
            output: Option<&Value>,
            error: Option<&str>,
            wake_at: Option<DateTime<Utc>>,
        ) -> Result<(), RepositoryError> {
            self.inner
                .update_instance_status(id, status, output, error, wake_at)
                .await
        }

        async fn list_instances(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
            self.inner.list_instances().await
        }

        async fn list_due_instances(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
            self.inner.list_due_instances(now).await
        }

        async fn append_record(&self, record: &JournalRecord) -> Result<(), RepositoryError> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(RepositoryError::Unavailable("store offline".to_string()));
            }
            self.inner.append_record(record).await
        }

        async fn update_step_attempts(
            &self,
            record_id: &Uuid,
            attempts: u32,
        ) -> Result<(), RepositoryError> {
            self.inner.update_step_attempts(record_id, attempts).await
        }

        async fn complete_step(
            &self,
            record_id: &Uuid,
            outcome: &StepOutcome,
            attempts: u32,
        ) -> Result<(), RepositoryError> {
            self.inner.complete_step(record_id, outcome, attempts).await
        }

        async fn complete_sleep(&self, record_id: &Uuid) -> Result<(), RepositoryError> {
            self.inner.complete_sleep(record_id).await
        }

        async fn resolve_wait(
            &self,
            record_id: &Uuid,
            resolution: &WaitResolution,
        ) -> Result<(), RepositoryError> {
            self.inner.resolve_wait(record_id, resolution).await
        }

        async fn list_records(
            &self,
            instance_id: &Uuid,
        ) -> Result<Vec<JournalRecord>, RepositoryError> {
            self.inner.list_records(instance_id).await
        }

        async fn push_event(&self, event: &BufferedEvent) -> Result<(), RepositoryError> {
            self.inner.push_event(event).await
        }

        async fn pop_event(
            &self,
            instance_id: &Uuid,
            event_type: &str,
        ) -> Result<Option<BufferedEvent>, RepositoryError> {
            self.inner.pop_event(instance_id, event_type).await
        }
    }

    #[tokio::test]
    async fn test_store_outage_leaves_instance_retryable() {
        let repo = Arc::new(FlakyRepository {
            inner: MemoryJournalRepository::new(),
            fail_appends: AtomicBool::new(true),
        });
        let registry = Arc::new(WorkflowRegistry::new());
        registry.register("order", |ctx, _params| async move {
            ctx.step("fetch", || async { Ok(json!(1)) }).await?;
            Ok(json!("done"))
        });
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&repo), Arc::clone(&registry)));

        let id = Uuid::now_v7();
        repo.create_instance(&WorkflowInstance::new(id, "order", json!({})))
            .await
            .unwrap();

        let err = scheduler.drive(id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Repository(RepositoryError::Unavailable(_))
        ));
        // Not Errored: the same drive succeeds once the store is back.
        let instance = repo.get_instance(&id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);

        repo.fail_appends.store(false, Ordering::SeqCst);
        scheduler.drive(id).await.unwrap();
        assert_eq!(
            repo.get_instance(&id).await.unwrap().unwrap().status,
            InstanceStatus::Complete
        );
    }
}
