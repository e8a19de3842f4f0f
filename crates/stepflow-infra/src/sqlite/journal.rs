//! SQLite journal repository implementation.
//!
//! Implements `JournalRepository` from `stepflow-core` using sqlx with
//! split read/write pools. Journal entries are stored as JSON blobs in a
//! text column; timestamps are RFC 3339 text, which keeps `wake_at`
//! comparisons valid as plain string comparisons.

use chrono::{DateTime, Utc};
use sqlx::Row;
use stepflow_core::repository::journal::JournalRepository;
use stepflow_types::error::RepositoryError;
use stepflow_types::event::BufferedEvent;
use stepflow_types::instance::{InstanceStatus, WorkflowInstance};
use stepflow_types::journal::{JournalEntry, JournalRecord, StepOutcome, WaitResolution};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `JournalRepository`.
pub struct SqliteJournalRepository {
    pool: DatabasePool,
}

impl SqliteJournalRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Load a journal record's entry for a read-modify-write update.
    /// Runs on the writer so it serializes with the following UPDATE.
    async fn load_entry(&self, record_id: &Uuid) -> Result<JournalEntry, RepositoryError> {
        let row = sqlx::query("SELECT entry FROM journal_records WHERE id = ?")
            .bind(record_id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;

        let row = row.ok_or(RepositoryError::NotFound)?;
        let entry: String = row.try_get("entry").map_err(map_sqlx)?;
        serde_json::from_str(&entry)
            .map_err(|e| RepositoryError::Query(format!("invalid journal entry JSON: {e}")))
    }

    async fn store_entry(
        &self,
        record_id: &Uuid,
        entry: &JournalEntry,
        finalized: bool,
    ) -> Result<(), RepositoryError> {
        let entry_json = serde_json::to_string(entry)
            .map_err(|e| RepositoryError::Query(format!("serialize journal entry: {e}")))?;
        let completed_at = finalized.then(|| format_datetime(&Utc::now()));

        let result = sqlx::query(
            "UPDATE journal_records SET entry = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(&entry_json)
        .bind(&completed_at)
        .bind(record_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct InstanceRow {
    id: String,
    workflow: String,
    params: String,
    status: String,
    output: Option<String>,
    error: Option<String>,
    wake_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl InstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow: row.try_get("workflow")?,
            params: row.try_get("params")?,
            status: row.try_get("status")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            wake_at: row.try_get("wake_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_instance(self) -> Result<WorkflowInstance, RepositoryError> {
        let id = parse_uuid(&self.id)?;
        let status: InstanceStatus =
            serde_json::from_value(serde_json::Value::String(self.status.clone()))
                .map_err(|_| RepositoryError::Query(format!("invalid status: {}", self.status)))?;

        let params: serde_json::Value = serde_json::from_str(&self.params)
            .map_err(|e| RepositoryError::Query(format!("invalid params JSON: {e}")))?;

        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid output JSON: {e}")))
            })
            .transpose()?;

        let wake_at = self.wake_at.as_deref().map(parse_datetime).transpose()?;
        let created_at = parse_datetime(&self.created_at)?;
        let updated_at = parse_datetime(&self.updated_at)?;

        Ok(WorkflowInstance {
            id,
            workflow: self.workflow,
            params,
            status,
            output,
            error: self.error,
            wake_at,
            created_at,
            updated_at,
        })
    }
}

struct JournalRow {
    id: String,
    instance_id: String,
    position: i64,
    label: String,
    entry: String,
    created_at: String,
    completed_at: Option<String>,
}

impl JournalRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            position: row.try_get("position")?,
            label: row.try_get("label")?,
            entry: row.try_get("entry")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_record(self) -> Result<JournalRecord, RepositoryError> {
        let id = parse_uuid(&self.id)?;
        let instance_id = parse_uuid(&self.instance_id)?;
        let entry: JournalEntry = serde_json::from_str(&self.entry)
            .map_err(|e| RepositoryError::Query(format!("invalid journal entry JSON: {e}")))?;

        let created_at = parse_datetime(&self.created_at)?;
        let completed_at = self
            .completed_at
            .as_deref()
            .map(parse_datetime)
            .transpose()?;

        Ok(JournalRecord {
            id,
            instance_id,
            position: self.position as u32,
            label: self.label,
            entry,
            created_at,
            completed_at,
        })
    }
}

struct EventRow {
    id: String,
    instance_id: String,
    event_type: String,
    payload: String,
    received_at: String,
}

impl EventRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            received_at: row.try_get("received_at")?,
        })
    }

    fn into_event(self) -> Result<BufferedEvent, RepositoryError> {
        Ok(BufferedEvent {
            id: parse_uuid(&self.id)?,
            instance_id: parse_uuid(&self.instance_id)?,
            event_type: self.event_type,
            payload: serde_json::from_str(&self.payload)
                .map_err(|e| RepositoryError::Query(format!("invalid event payload: {e}")))?,
            received_at: parse_datetime(&self.received_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn format_status(status: InstanceStatus) -> Result<String, RepositoryError> {
    match serde_json::to_value(status) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        _ => Err(RepositoryError::Query(format!(
            "unserializable status: {status:?}"
        ))),
    }
}

fn map_sqlx(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Unavailable(e.to_string())
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

fn map_insert_conflict(e: sqlx::Error, conflict_msg: String) -> RepositoryError {
    if e.as_database_error()
        .is_some_and(|d| d.is_unique_violation())
    {
        RepositoryError::Conflict(conflict_msg)
    } else {
        map_sqlx(e)
    }
}

// ---------------------------------------------------------------------------
// JournalRepository impl
// ---------------------------------------------------------------------------

impl JournalRepository for SqliteJournalRepository {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        let params_json = serde_json::to_string(&instance.params)
            .map_err(|e| RepositoryError::Query(format!("serialize params: {e}")))?;
        let status = format_status(instance.status)?;

        sqlx::query(
            r#"INSERT INTO instances (id, workflow, params, status, output, error, wake_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, NULL, NULL, NULL, ?, ?)"#,
        )
        .bind(instance.id.to_string())
        .bind(&instance.workflow)
        .bind(&params_json)
        .bind(&status)
        .bind(format_datetime(&instance.created_at))
        .bind(format_datetime(&instance.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            map_insert_conflict(e, format!("instance already exists: {}", instance.id))
        })?;

        Ok(())
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        match row {
            Some(row) => {
                let r = InstanceRow::from_row(&row).map_err(map_sqlx)?;
                Ok(Some(r.into_instance()?))
            }
            None => Ok(None),
        }
    }

    async fn update_instance_status(
        &self,
        id: &Uuid,
        status: InstanceStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
        wake_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let status_str = format_status(status)?;
        let output_json = output
            .map(|v| {
                serde_json::to_string(v)
                    .map_err(|e| RepositoryError::Query(format!("serialize output: {e}")))
            })
            .transpose()?;
        let wake_at_str = wake_at.map(|dt| format_datetime(&dt));

        // Terminal statuses are sticky; only a same-status rewrite passes.
        let result = sqlx::query(
            r#"UPDATE instances
               SET status = ?, output = ?, error = ?, wake_at = ?, updated_at = ?
               WHERE id = ?
                 AND (status NOT IN ('complete', 'errored', 'terminated') OR status = ?)"#,
        )
        .bind(&status_str)
        .bind(&output_json)
        .bind(error)
        .bind(&wake_at_str)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .bind(&status_str)
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM instances WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool.writer)
                .await
                .map_err(map_sqlx)?;
            return match exists {
                Some(_) => Err(RepositoryError::Conflict(format!(
                    "instance {id} is already terminal"
                ))),
                None => Err(RepositoryError::NotFound),
            };
        }
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM instances ORDER BY created_at DESC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| {
                InstanceRow::from_row(row)
                    .map_err(map_sqlx)?
                    .into_instance()
            })
            .collect()
    }

    async fn list_due_instances(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        // RFC 3339 UTC timestamps compare correctly as text.
        let rows = sqlx::query(
            r#"SELECT * FROM instances
               WHERE status IN ('sleeping', 'waiting_for_event')
                 AND wake_at IS NOT NULL AND wake_at <= ?
               ORDER BY wake_at ASC"#,
        )
        .bind(format_datetime(&now))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| {
                InstanceRow::from_row(row)
                    .map_err(map_sqlx)?
                    .into_instance()
            })
            .collect()
    }

    async fn append_record(&self, record: &JournalRecord) -> Result<(), RepositoryError> {
        let entry_json = serde_json::to_string(&record.entry)
            .map_err(|e| RepositoryError::Query(format!("serialize journal entry: {e}")))?;

        sqlx::query(
            r#"INSERT INTO journal_records (id, instance_id, position, label, entry, created_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, NULL)"#,
        )
        .bind(record.id.to_string())
        .bind(record.instance_id.to_string())
        .bind(record.position as i64)
        .bind(&record.label)
        .bind(&entry_json)
        .bind(format_datetime(&record.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            map_insert_conflict(
                e,
                format!(
                    "journal position {} already taken for instance {}",
                    record.position, record.instance_id
                ),
            )
        })?;

        Ok(())
    }

    async fn update_step_attempts(
        &self,
        record_id: &Uuid,
        attempts: u32,
    ) -> Result<(), RepositoryError> {
        let mut entry = self.load_entry(record_id).await?;
        if let JournalEntry::Step { attempts: a, .. } = &mut entry {
            *a = attempts;
        }
        self.store_entry(record_id, &entry, false).await
    }

    async fn complete_step(
        &self,
        record_id: &Uuid,
        outcome: &StepOutcome,
        attempts: u32,
    ) -> Result<(), RepositoryError> {
        let mut entry = self.load_entry(record_id).await?;
        if let JournalEntry::Step {
            attempts: a,
            outcome: o,
        } = &mut entry
        {
            *a = attempts;
            *o = Some(outcome.clone());
        }
        self.store_entry(record_id, &entry, true).await
    }

    async fn complete_sleep(&self, record_id: &Uuid) -> Result<(), RepositoryError> {
        let mut entry = self.load_entry(record_id).await?;
        if let JournalEntry::Sleep { fired, .. } = &mut entry {
            *fired = true;
        }
        self.store_entry(record_id, &entry, true).await
    }

    async fn resolve_wait(
        &self,
        record_id: &Uuid,
        resolution: &WaitResolution,
    ) -> Result<(), RepositoryError> {
        let mut entry = self.load_entry(record_id).await?;
        if let JournalEntry::EventWait { resolution: r, .. } = &mut entry {
            *r = Some(resolution.clone());
        }
        self.store_entry(record_id, &entry, true).await
    }

    async fn list_records(&self, instance_id: &Uuid) -> Result<Vec<JournalRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM journal_records WHERE instance_id = ? ORDER BY position ASC",
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| JournalRow::from_row(row).map_err(map_sqlx)?.into_record())
            .collect()
    }

    async fn push_event(&self, event: &BufferedEvent) -> Result<(), RepositoryError> {
        let payload_json = serde_json::to_string(&event.payload)
            .map_err(|e| RepositoryError::Query(format!("serialize event payload: {e}")))?;

        sqlx::query(
            r#"INSERT INTO event_buffer (id, instance_id, event_type, payload, received_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(event.instance_id.to_string())
        .bind(&event.event_type)
        .bind(&payload_json)
        .bind(format_datetime(&event.received_at))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn pop_event(
        &self,
        instance_id: &Uuid,
        event_type: &str,
    ) -> Result<Option<BufferedEvent>, RepositoryError> {
        // One DELETE .. RETURNING, so concurrent pops cannot hand out
        // the same event. UUIDv7 text order is arrival order.
        let row = sqlx::query(
            r#"DELETE FROM event_buffer
               WHERE id = (
                   SELECT id FROM event_buffer
                   WHERE instance_id = ? AND event_type = ?
                   ORDER BY id ASC LIMIT 1
               )
               RETURNING *"#,
        )
        .bind(instance_id.to_string())
        .bind(event_type)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(map_sqlx)?;

        match row {
            Some(row) => Ok(Some(EventRow::from_row(&row).map_err(map_sqlx)?.into_event()?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_repo() -> (tempfile::TempDir, SqliteJournalRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, SqliteJournalRepository::new(pool))
    }

    #[tokio::test]
    async fn test_instance_roundtrip() {
        let (_dir, repo) = test_repo().await;
        let instance =
            WorkflowInstance::new(Uuid::now_v7(), "order", json!({"email": "a@b.com"}));
        repo.create_instance(&instance).await.unwrap();

        let loaded = repo.get_instance(&instance.id).await.unwrap().unwrap();
        assert_eq!(loaded.workflow, "order");
        assert_eq!(loaded.params, json!({"email": "a@b.com"}));
        assert_eq!(loaded.status, InstanceStatus::Running);
        assert!(loaded.output.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_instance_id_conflicts() {
        let (_dir, repo) = test_repo().await;
        let instance = WorkflowInstance::new(Uuid::now_v7(), "order", json!({}));
        repo.create_instance(&instance).await.unwrap();
        let err = repo.create_instance(&instance).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_status_update_and_due_listing() {
        let (_dir, repo) = test_repo().await;
        let instance = WorkflowInstance::new(Uuid::now_v7(), "nap", json!({}));
        repo.create_instance(&instance).await.unwrap();

        let past = Utc::now() - chrono::Duration::seconds(5);
        repo.update_instance_status(
            &instance.id,
            InstanceStatus::Sleeping,
            None,
            None,
            Some(past),
        )
        .await
        .unwrap();

        let due = repo.list_due_instances(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, instance.id);

        // Complete instances are never due.
        repo.update_instance_status(
            &instance.id,
            InstanceStatus::Complete,
            Some(&json!("done")),
            None,
            None,
        )
        .await
        .unwrap();
        assert!(repo.list_due_instances(Utc::now()).await.unwrap().is_empty());

        let loaded = repo.get_instance(&instance.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InstanceStatus::Complete);
        assert_eq!(loaded.output, Some(json!("done")));
        assert!(loaded.wake_at.is_none());
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky() {
        let (_dir, repo) = test_repo().await;
        let instance = WorkflowInstance::new(Uuid::now_v7(), "order", json!({}));
        repo.create_instance(&instance).await.unwrap();
        repo.update_instance_status(&instance.id, InstanceStatus::Terminated, None, None, None)
            .await
            .unwrap();

        let err = repo
            .update_instance_status(
                &instance.id,
                InstanceStatus::Running,
                None,
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(
            repo.get_instance(&instance.id).await.unwrap().unwrap().status,
            InstanceStatus::Terminated
        );
    }

    #[tokio::test]
    async fn test_update_missing_instance_is_not_found() {
        let (_dir, repo) = test_repo().await;
        let err = repo
            .update_instance_status(&Uuid::now_v7(), InstanceStatus::Running, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_journal_append_finalize_and_order() {
        let (_dir, repo) = test_repo().await;
        let instance = WorkflowInstance::new(Uuid::now_v7(), "order", json!({}));
        repo.create_instance(&instance).await.unwrap();

        let step = JournalRecord::new(
            instance.id,
            0,
            "fetch-list",
            JournalEntry::Step {
                attempts: 0,
                outcome: None,
            },
        );
        let sleep = JournalRecord::new(
            instance.id,
            1,
            "pause",
            JournalEntry::Sleep {
                wake_at: Utc::now(),
                fired: false,
            },
        );
        repo.append_record(&step).await.unwrap();
        repo.append_record(&sleep).await.unwrap();

        repo.update_step_attempts(&step.id, 1).await.unwrap();
        repo.complete_step(
            &step.id,
            &StepOutcome::Success {
                value: json!([1, 2, 3]),
            },
            1,
        )
        .await
        .unwrap();
        repo.complete_sleep(&sleep.id).await.unwrap();

        let records = repo.list_records(&instance.id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].position, 0);
        assert!(matches!(
            &records[0].entry,
            JournalEntry::Step {
                attempts: 1,
                outcome: Some(StepOutcome::Success { value })
            } if *value == json!([1, 2, 3])
        ));
        assert!(records[0].completed_at.is_some());
        assert!(matches!(
            records[1].entry,
            JournalEntry::Sleep { fired: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_journal_position_uniqueness() {
        let (_dir, repo) = test_repo().await;
        let instance = WorkflowInstance::new(Uuid::now_v7(), "order", json!({}));
        repo.create_instance(&instance).await.unwrap();

        let entry = JournalEntry::Step {
            attempts: 0,
            outcome: None,
        };
        repo.append_record(&JournalRecord::new(instance.id, 0, "a", entry.clone()))
            .await
            .unwrap();
        let err = repo
            .append_record(&JournalRecord::new(instance.id, 0, "b", entry))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_wait_resolution_roundtrip() {
        let (_dir, repo) = test_repo().await;
        let instance = WorkflowInstance::new(Uuid::now_v7(), "waiter", json!({}));
        repo.create_instance(&instance).await.unwrap();

        let wait = JournalRecord::new(
            instance.id,
            0,
            "approval",
            JournalEntry::EventWait {
                event_type: "approval".to_string(),
                timeout_at: Utc::now(),
                resolution: None,
            },
        );
        repo.append_record(&wait).await.unwrap();
        repo.resolve_wait(
            &wait.id,
            &WaitResolution::Received {
                payload: json!({"approved": true}),
            },
        )
        .await
        .unwrap();

        let records = repo.list_records(&instance.id).await.unwrap();
        assert!(matches!(
            &records[0].entry,
            JournalEntry::EventWait {
                resolution: Some(WaitResolution::Received { payload }),
                ..
            } if *payload == json!({"approved": true})
        ));
    }

    #[tokio::test]
    async fn test_event_buffer_fifo() {
        let (_dir, repo) = test_repo().await;
        let instance = WorkflowInstance::new(Uuid::now_v7(), "waiter", json!({}));
        repo.create_instance(&instance).await.unwrap();

        repo.push_event(&BufferedEvent::new(instance.id, "approval", json!(1)))
            .await
            .unwrap();
        repo.push_event(&BufferedEvent::new(instance.id, "approval", json!(2)))
            .await
            .unwrap();
        repo.push_event(&BufferedEvent::new(instance.id, "other", json!(3)))
            .await
            .unwrap();

        let first = repo
            .pop_event(&instance.id, "approval")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.payload, json!(1));
        let second = repo
            .pop_event(&instance.id, "approval")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.payload, json!(2));
        assert!(repo
            .pop_event(&instance.id, "approval")
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .pop_event(&instance.id, "other")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("durable.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let instance = WorkflowInstance::new(Uuid::now_v7(), "order", json!({}));
        {
            let repo = SqliteJournalRepository::new(DatabasePool::new(&url).await.unwrap());
            repo.create_instance(&instance).await.unwrap();
            let record = JournalRecord::new(
                instance.id,
                0,
                "fetch-list",
                JournalEntry::Step {
                    attempts: 1,
                    outcome: Some(StepOutcome::Success {
                        value: json!([1, 2, 3]),
                    }),
                },
            );
            repo.append_record(&record).await.unwrap();
        }

        let repo = SqliteJournalRepository::new(DatabasePool::new(&url).await.unwrap());
        let records = repo.list_records(&instance.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].entry.is_finalized());
    }
}
