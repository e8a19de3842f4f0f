//! Journal repository trait definition.
//!
//! Defines the storage interface for workflow instances, journal records,
//! and buffered events. The infrastructure layer (stepflow-infra)
//! implements this trait with SQLite persistence; tests use the in-memory
//! implementation in [`crate::repository::memory`].

use chrono::{DateTime, Utc};
use stepflow_types::error::RepositoryError;
use stepflow_types::event::BufferedEvent;
use stepflow_types::instance::{InstanceStatus, WorkflowInstance};
use stepflow_types::journal::{JournalRecord, StepOutcome, WaitResolution};
use uuid::Uuid;

/// Repository trait for workflow engine persistence.
///
/// Covers three entity families:
/// - **Instances:** create/query/update workflow instances.
/// - **Journal:** append and finalize per-instance journal records.
/// - **Events:** a FIFO buffer of external events per `(instance, type)`.
///
/// A successful `append_record` means the record is durable: it must
/// survive process restart before the call returns. Callers must not
/// assume a step ran if the append failed.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait JournalRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Persist a new instance. Fails `Conflict` if the id already exists.
    fn create_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an instance by id.
    fn get_instance(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// Update an instance's status and the columns that travel with it.
    ///
    /// `output` is set on Complete, `error` on Errored, `wake_at` while
    /// Sleeping/WaitingForEvent; passing `None` clears the column.
    /// Terminal statuses are sticky: a transition out of Complete,
    /// Errored, or Terminated fails `Conflict`.
    fn update_instance_status(
        &self,
        id: &Uuid,
        status: InstanceStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
        wake_at: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all instances, newest first.
    fn list_instances(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// List suspended instances whose `wake_at` is at or before `now`.
    fn list_due_instances(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Journal
    // -----------------------------------------------------------------------

    /// Append a journal record. Durable before returning. Fails `Conflict`
    /// if the instance already has a record at the same position.
    fn append_record(
        &self,
        record: &JournalRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Record the running attempt count on an in-flight step record.
    fn update_step_attempts(
        &self,
        record_id: &Uuid,
        attempts: u32,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Finalize a step record with its terminal outcome.
    fn complete_step(
        &self,
        record_id: &Uuid,
        outcome: &StepOutcome,
        attempts: u32,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Mark a sleep record as fired.
    fn complete_sleep(
        &self,
        record_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Finalize an event-wait record with its resolution.
    fn resolve_wait(
        &self,
        record_id: &Uuid,
        resolution: &WaitResolution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List an instance's journal, ordered by position ASC.
    fn list_records(
        &self,
        instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<JournalRecord>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Event buffer
    // -----------------------------------------------------------------------

    /// Buffer an external event for later consumption.
    fn push_event(
        &self,
        event: &BufferedEvent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove and return the oldest buffered event of the given type for
    /// the instance, or `None` when the buffer is empty.
    fn pop_event(
        &self,
        instance_id: &Uuid,
        event_type: &str,
    ) -> impl std::future::Future<Output = Result<Option<BufferedEvent>, RepositoryError>> + Send;
}
