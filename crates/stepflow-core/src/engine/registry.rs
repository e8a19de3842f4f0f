//! Workflow registry and the engine facade.
//!
//! Run functions are registered by name as boxed async closures over
//! `(WorkflowContext, params)`. The [`Engine`] ties the registry, the
//! scheduler, and the repository together into the public surface the
//! API layer calls: create, status, journal, submit_event, terminate.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;
use serde::Serialize;
use stepflow_types::error::RepositoryError;
use stepflow_types::event::BufferedEvent;
use stepflow_types::instance::{InstanceStatus, WorkflowInstance};
use stepflow_types::journal::JournalRecord;
use uuid::Uuid;

use crate::repository::journal::JournalRepository;

use super::context::{RunError, WorkflowContext};
use super::scheduler::{EngineError, Scheduler};

// ---------------------------------------------------------------------------
// WorkflowRegistry
// ---------------------------------------------------------------------------

/// Type-erased run function: `(ctx, params) -> output`.
pub type WorkflowFn<R> = Arc<
    dyn Fn(WorkflowContext<R>, Value) -> BoxFuture<'static, Result<Value, RunError>>
        + Send
        + Sync,
>;

/// Named workflow definitions, keyed by name.
pub struct WorkflowRegistry<R: JournalRepository> {
    workflows: DashMap<String, WorkflowFn<R>>,
}

impl<R: JournalRepository> Default for WorkflowRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: JournalRepository> WorkflowRegistry<R> {
    pub fn new() -> Self {
        Self {
            workflows: DashMap::new(),
        }
    }

    /// Register a run function under `name`, replacing any previous one.
    pub fn register<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(WorkflowContext<R>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RunError>> + Send + 'static,
    {
        let erased: WorkflowFn<R> = Arc::new(move |ctx, params| Box::pin(f(ctx, params)));
        self.workflows.insert(name.to_string(), erased);
    }

    pub fn get(&self, name: &str) -> Option<WorkflowFn<R>> {
        self.workflows.get(name).map(|e| e.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.workflows.iter().map(|e| e.key().clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Point-in-time view of an instance, as returned by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatusReport {
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The engine facade: registry + scheduler + repository.
pub struct Engine<R: JournalRepository + 'static> {
    repo: Arc<R>,
    registry: Arc<WorkflowRegistry<R>>,
    scheduler: Arc<Scheduler<R>>,
}

impl<R: JournalRepository + 'static> Engine<R> {
    pub fn new(repo: R) -> Self {
        let repo = Arc::new(repo);
        let registry = Arc::new(WorkflowRegistry::new());
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&repo), Arc::clone(&registry)));
        Self {
            repo,
            registry,
            scheduler,
        }
    }

    /// Register a named workflow.
    pub fn register<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(WorkflowContext<R>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RunError>> + Send + 'static,
    {
        self.registry.register(name, f);
        tracing::debug!(workflow = name, "workflow registered");
    }

    /// The scheduler, for wiring the timer service.
    pub fn scheduler(&self) -> Arc<Scheduler<R>> {
        Arc::clone(&self.scheduler)
    }

    /// The underlying repository.
    pub fn repository(&self) -> Arc<R> {
        Arc::clone(&self.repo)
    }

    /// Create an instance of a registered workflow and schedule its first
    /// drive. Allocates a UUIDv7 when `id` is not supplied; a previously
    /// used id fails `DuplicateInstanceId`.
    pub async fn create(
        &self,
        workflow: &str,
        id: Option<Uuid>,
        params: Value,
    ) -> Result<Uuid, EngineError> {
        if !self.registry.contains(workflow) {
            return Err(EngineError::WorkflowNotFound(workflow.to_string()));
        }

        let id = id.unwrap_or_else(Uuid::now_v7);
        let instance = WorkflowInstance::new(id, workflow, params);
        self.repo
            .create_instance(&instance)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => EngineError::DuplicateInstanceId(id),
                other => EngineError::Repository(other),
            })?;

        tracing::info!(instance_id = %id, workflow, "instance created");

        let scheduler = Arc::clone(&self.scheduler);
        tokio::spawn(async move {
            if let Err(e) = scheduler.drive(id).await {
                tracing::error!(instance_id = %id, error = %e, "initial drive failed");
            }
        });

        Ok(id)
    }

    /// Drive an instance now. Safe to call at any time; replay makes a
    /// redundant drive a no-op.
    pub async fn drive(&self, id: Uuid) -> Result<(), EngineError> {
        self.scheduler.drive(id).await
    }

    /// Point-in-time status. Never blocks on the instance's progress.
    pub async fn status(&self, id: Uuid) -> Result<InstanceStatusReport, EngineError> {
        let instance = self.instance(id).await?;
        Ok(InstanceStatusReport {
            status: instance.status,
            output: instance.output,
            error: instance.error,
        })
    }

    /// The full instance row.
    pub async fn instance(&self, id: Uuid) -> Result<WorkflowInstance, EngineError> {
        self.repo
            .get_instance(&id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// The instance's journal, ordered by position.
    pub async fn journal(&self, id: Uuid) -> Result<Vec<JournalRecord>, EngineError> {
        self.instance(id).await?;
        Ok(self.repo.list_records(&id).await?)
    }

    /// Deliver an external event. Buffered if the instance is not
    /// currently waiting; re-drives it if it is.
    pub async fn submit_event(
        &self,
        id: Uuid,
        event_type: &str,
        payload: Value,
    ) -> Result<(), EngineError> {
        let instance = self.instance(id).await?;
        self.repo
            .push_event(&BufferedEvent::new(id, event_type, payload))
            .await?;

        tracing::info!(instance_id = %id, event_type, "event submitted");

        if instance.status == InstanceStatus::WaitingForEvent {
            let scheduler = Arc::clone(&self.scheduler);
            tokio::spawn(async move {
                if let Err(e) = scheduler.drive(id).await {
                    tracing::error!(instance_id = %id, error = %e, "event-triggered drive failed");
                }
            });
        }
        Ok(())
    }

    /// Terminate an instance. Terminal instances are left unchanged.
    pub async fn terminate(&self, id: Uuid) -> Result<(), EngineError> {
        self.scheduler.terminate(id).await
    }

    /// All instances, newest first.
    pub async fn list_instances(&self) -> Result<Vec<WorkflowInstance>, EngineError> {
        Ok(self.repo.list_instances().await?)
    }

    /// Re-drive instances a previous process left in `Running`, picking
    /// mid-step work back up from the journal. Call once at startup; the
    /// timer only watches `wake_at`, so crashed-while-running instances
    /// are otherwise stranded. Returns how many drives were scheduled.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let instances = self.repo.list_instances().await?;
        let mut resumed = 0;
        for instance in instances {
            if instance.status != InstanceStatus::Running {
                continue;
            }
            resumed += 1;
            let scheduler = Arc::clone(&self.scheduler);
            let id = instance.id;
            tokio::spawn(async move {
                if let Err(e) = scheduler.drive(id).await {
                    tracing::error!(instance_id = %id, error = %e, "recovery drive failed");
                }
            });
        }
        if resumed > 0 {
            tracing::info!(count = resumed, "resuming instances left running");
        }
        Ok(resumed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
