//! In-memory journal repository.
//!
//! Backs tests and ephemeral engines. Cloning shares the underlying
//! store, which is what a "restart" test wants: drop the engine, build a
//! new one over a clone, and the journal is still there.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use stepflow_types::error::RepositoryError;
use stepflow_types::event::BufferedEvent;
use stepflow_types::instance::{InstanceStatus, WorkflowInstance};
use stepflow_types::journal::{JournalEntry, JournalRecord, StepOutcome, WaitResolution};
use uuid::Uuid;

use super::journal::JournalRepository;

#[derive(Default)]
struct Inner {
    instances: HashMap<Uuid, WorkflowInstance>,
    /// Per-instance journal, kept sorted by position.
    records: HashMap<Uuid, Vec<JournalRecord>>,
    /// record id -> owning instance, for finalize-by-id lookups.
    record_owner: HashMap<Uuid, Uuid>,
    events: HashMap<Uuid, VecDeque<BufferedEvent>>,
}

/// In-memory [`JournalRepository`].
#[derive(Default, Clone)]
pub struct MemoryJournalRepository {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryJournalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(
        &self,
        record_id: &Uuid,
        f: impl FnOnce(&mut JournalRecord) -> T,
    ) -> Result<T, RepositoryError> {
        let mut inner = self.lock();
        let instance_id = *inner
            .record_owner
            .get(record_id)
            .ok_or(RepositoryError::NotFound)?;
        let record = inner
            .records
            .get_mut(&instance_id)
            .and_then(|recs| recs.iter_mut().find(|r| r.id == *record_id))
            .ok_or(RepositoryError::NotFound)?;
        Ok(f(record))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-mutation; tests want the panic.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl JournalRepository for MemoryJournalRepository {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        let mut inner = self.lock();
        if inner.instances.contains_key(&instance.id) {
            return Err(RepositoryError::Conflict(format!(
                "instance already exists: {}",
                instance.id
            )));
        }
        inner.instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Ok(self.lock().instances.get(id).cloned())
    }

    async fn update_instance_status(
        &self,
        id: &Uuid,
        status: InstanceStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
        wake_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.lock();
        let instance = inner.instances.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if instance.status.is_terminal() && status != instance.status {
            return Err(RepositoryError::Conflict(format!(
                "instance {id} is already terminal"
            )));
        }
        instance.status = status;
        instance.output = output.cloned();
        instance.error = error.map(str::to_string);
        instance.wake_at = wake_at;
        instance.updated_at = Utc::now();
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let inner = self.lock();
        let mut all: Vec<WorkflowInstance> = inner.instances.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn list_due_instances(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let inner = self.lock();
        let mut due: Vec<WorkflowInstance> = inner
            .instances
            .values()
            .filter(|i| {
                matches!(
                    i.status,
                    InstanceStatus::Sleeping | InstanceStatus::WaitingForEvent
                ) && i.wake_at.is_some_and(|w| w <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|i| i.wake_at);
        Ok(due)
    }

    async fn append_record(&self, record: &JournalRecord) -> Result<(), RepositoryError> {
        let mut inner = self.lock();
        let records = inner.records.entry(record.instance_id).or_default();
        if records.iter().any(|r| r.position == record.position) {
            return Err(RepositoryError::Conflict(format!(
                "journal position {} already taken for instance {}",
                record.position, record.instance_id
            )));
        }
        records.push(record.clone());
        records.sort_by_key(|r| r.position);
        inner.record_owner.insert(record.id, record.instance_id);
        Ok(())
    }

    async fn update_step_attempts(
        &self,
        record_id: &Uuid,
        attempts: u32,
    ) -> Result<(), RepositoryError> {
        self.with_record(record_id, |record| {
            if let JournalEntry::Step { attempts: a, .. } = &mut record.entry {
                *a = attempts;
            }
        })
    }

    async fn complete_step(
        &self,
        record_id: &Uuid,
        outcome: &StepOutcome,
        attempts: u32,
    ) -> Result<(), RepositoryError> {
        self.with_record(record_id, |record| {
            if let JournalEntry::Step {
                attempts: a,
                outcome: o,
            } = &mut record.entry
            {
                *a = attempts;
                *o = Some(outcome.clone());
            }
            record.completed_at = Some(Utc::now());
        })
    }

    async fn complete_sleep(&self, record_id: &Uuid) -> Result<(), RepositoryError> {
        self.with_record(record_id, |record| {
            if let JournalEntry::Sleep { fired, .. } = &mut record.entry {
                *fired = true;
            }
            record.completed_at = Some(Utc::now());
        })
    }

    async fn resolve_wait(
        &self,
        record_id: &Uuid,
        resolution: &WaitResolution,
    ) -> Result<(), RepositoryError> {
        self.with_record(record_id, |record| {
            if let JournalEntry::EventWait { resolution: r, .. } = &mut record.entry {
                *r = Some(resolution.clone());
            }
            record.completed_at = Some(Utc::now());
        })
    }

    async fn list_records(&self, instance_id: &Uuid) -> Result<Vec<JournalRecord>, RepositoryError> {
        Ok(self
            .lock()
            .records
            .get(instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn push_event(&self, event: &BufferedEvent) -> Result<(), RepositoryError> {
        self.lock()
            .events
            .entry(event.instance_id)
            .or_default()
            .push_back(event.clone());
        Ok(())
    }

    async fn pop_event(
        &self,
        instance_id: &Uuid,
        event_type: &str,
    ) -> Result<Option<BufferedEvent>, RepositoryError> {
        let mut inner = self.lock();
        let Some(buffer) = inner.events.get_mut(instance_id) else {
            return Ok(None);
        };
        let idx = buffer.iter().position(|e| e.event_type == event_type);
        Ok(idx.and_then(|i| buffer.remove(i)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(repo_id: Uuid) -> WorkflowInstance {
        WorkflowInstance::new(repo_id, "demo", json!({}))
    }

    #[tokio::test]
    async fn test_create_instance_conflict_on_duplicate_id() {
        let repo = MemoryJournalRepository::new();
        let id = Uuid::now_v7();
        repo.create_instance(&instance(id)).await.unwrap();
        let err = repo.create_instance(&instance(id)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_append_record_conflict_on_position() {
        let repo = MemoryJournalRepository::new();
        let id = Uuid::now_v7();
        repo.create_instance(&instance(id)).await.unwrap();

        let entry = JournalEntry::Step {
            attempts: 0,
            outcome: None,
        };
        repo.append_record(&JournalRecord::new(id, 0, "a", entry.clone()))
            .await
            .unwrap();
        let err = repo
            .append_record(&JournalRecord::new(id, 0, "b", entry))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_records_listed_in_position_order() {
        let repo = MemoryJournalRepository::new();
        let id = Uuid::now_v7();
        let entry = JournalEntry::Step {
            attempts: 0,
            outcome: None,
        };
        for pos in [2u32, 0, 1] {
            repo.append_record(&JournalRecord::new(id, pos, "s", entry.clone()))
                .await
                .unwrap();
        }
        let records = repo.list_records(&id).await.unwrap();
        let positions: Vec<u32> = records.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_complete_step_finalizes_outcome() {
        let repo = MemoryJournalRepository::new();
        let id = Uuid::now_v7();
        let record = JournalRecord::new(
            id,
            0,
            "fetch",
            JournalEntry::Step {
                attempts: 0,
                outcome: None,
            },
        );
        repo.append_record(&record).await.unwrap();
        repo.complete_step(
            &record.id,
            &StepOutcome::Success {
                value: json!([1, 2, 3]),
            },
            1,
        )
        .await
        .unwrap();

        let records = repo.list_records(&id).await.unwrap();
        assert!(records[0].entry.is_finalized());
        assert!(records[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_event_buffer_is_fifo_per_type() {
        let repo = MemoryJournalRepository::new();
        let id = Uuid::now_v7();
        repo.push_event(&BufferedEvent::new(id, "approval", json!(1)))
            .await
            .unwrap();
        repo.push_event(&BufferedEvent::new(id, "other", json!("x")))
            .await
            .unwrap();
        repo.push_event(&BufferedEvent::new(id, "approval", json!(2)))
            .await
            .unwrap();

        let first = repo.pop_event(&id, "approval").await.unwrap().unwrap();
        assert_eq!(first.payload, json!(1));
        let second = repo.pop_event(&id, "approval").await.unwrap().unwrap();
        assert_eq!(second.payload, json!(2));
        assert!(repo.pop_event(&id, "approval").await.unwrap().is_none());
        // The other type is untouched.
        assert!(repo.pop_event(&id, "other").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_due_instances_filters_on_wake_at() {
        let repo = MemoryJournalRepository::new();
        let due_id = Uuid::now_v7();
        let later_id = Uuid::now_v7();
        let running_id = Uuid::now_v7();

        repo.create_instance(&instance(due_id)).await.unwrap();
        repo.create_instance(&instance(later_id)).await.unwrap();
        repo.create_instance(&instance(running_id)).await.unwrap();

        let now = Utc::now();
        repo.update_instance_status(
            &due_id,
            InstanceStatus::Sleeping,
            None,
            None,
            Some(now - chrono::Duration::seconds(5)),
        )
        .await
        .unwrap();
        repo.update_instance_status(
            &later_id,
            InstanceStatus::WaitingForEvent,
            None,
            None,
            Some(now + chrono::Duration::seconds(60)),
        )
        .await
        .unwrap();

        let due = repo.list_due_instances(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, due_id);
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky() {
        let repo = MemoryJournalRepository::new();
        let id = Uuid::now_v7();
        repo.create_instance(&instance(id)).await.unwrap();
        repo.update_instance_status(&id, InstanceStatus::Terminated, None, None, None)
            .await
            .unwrap();

        let err = repo
            .update_instance_status(&id, InstanceStatus::Complete, Some(&json!("late")), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(
            repo.get_instance(&id).await.unwrap().unwrap().status,
            InstanceStatus::Terminated
        );
    }

    #[tokio::test]
    async fn test_clone_shares_store() {
        let repo = MemoryJournalRepository::new();
        let id = Uuid::now_v7();
        repo.create_instance(&instance(id)).await.unwrap();

        let view = repo.clone();
        assert!(view.get_instance(&id).await.unwrap().is_some());
    }
}
