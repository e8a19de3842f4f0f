//! Workflow context: the API a run function programs against.
//!
//! A `WorkflowContext` is handed to the run function on every drive. It
//! keeps a cursor over the instance's journal; each directive the run
//! function reaches (step, sleep, event wait) consumes one position.
//! Finalized positions fast-forward from their stored outcome without
//! side effects, which is what makes replay idempotent.
//!
//! Suspension is cooperative: `sleep` and `wait_for_event` return
//! [`RunError::Suspended`] when their moment has not come, and the run
//! function propagates it with `?`. The scheduler catches it, persists
//! the suspended status, and re-drives later. There is no task parked
//! across a sleep.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use stepflow_types::error::RepositoryError;
use stepflow_types::instance::InstanceStatus;
use stepflow_types::journal::{JournalEntry, JournalRecord, StepOutcome, WaitResolution};
use stepflow_types::retry::RetryPolicy;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::journal::JournalRepository;

/// Bound on a single step body invocation when the policy does not set one.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 300;

// ---------------------------------------------------------------------------
// RunError
// ---------------------------------------------------------------------------

/// Errors surfaced to (and through) a workflow run function.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Control flow, not a failure: the instance is waiting on a sleep or
    /// an event. Propagate with `?`; the scheduler handles it.
    #[error("workflow suspended")]
    Suspended,

    /// A step failed on every allowed attempt.
    #[error("step '{label}' exhausted after {attempts} attempts: {error}")]
    StepExhausted {
        label: String,
        attempts: u32,
        error: String,
    },

    /// The directive at a journal position does not match the recorded
    /// kind: the run function's shape changed, or a label was reused for
    /// a structurally different operation.
    #[error("directive '{label}' at position {position} conflicts with journaled '{recorded}'")]
    DuplicateStepName {
        label: String,
        position: u32,
        recorded: &'static str,
    },

    /// The instance was terminated; pending outcomes are discarded.
    #[error("instance terminated")]
    Terminated,

    /// Persistence failure.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Failure raised by the run function itself, outside any step.
    #[error("workflow failed: {0}")]
    Failed(String),
}

impl From<anyhow::Error> for RunError {
    fn from(e: anyhow::Error) -> Self {
        RunError::Failed(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// EventOutcome
// ---------------------------------------------------------------------------

/// How a `wait_for_event` resolved. A timeout is a value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// A matching event arrived; holds its payload.
    Received(Value),
    /// The wait's deadline elapsed first.
    TimedOut,
}

impl EventOutcome {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, EventOutcome::TimedOut)
    }

    /// The payload, if an event was received.
    pub fn into_value(self) -> Option<Value> {
        match self {
            EventOutcome::Received(v) => Some(v),
            EventOutcome::TimedOut => None,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowContext
// ---------------------------------------------------------------------------

struct Cursor {
    /// Journal snapshot, sorted by position, updated as this drive
    /// appends and finalizes records.
    records: Vec<JournalRecord>,
    /// Next position to consume.
    next: u32,
}

/// Durable execution context for one drive of one instance.
///
/// Cheap to clone; clones share the cursor.
pub struct WorkflowContext<R: JournalRepository> {
    repo: Arc<R>,
    instance_id: Uuid,
    cancel: CancellationToken,
    cursor: Arc<Mutex<Cursor>>,
}

impl<R: JournalRepository> Clone for WorkflowContext<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            instance_id: self.instance_id,
            cancel: self.cancel.clone(),
            cursor: Arc::clone(&self.cursor),
        }
    }
}

impl<R: JournalRepository> WorkflowContext<R> {
    pub(crate) fn new(
        repo: Arc<R>,
        instance_id: Uuid,
        cancel: CancellationToken,
        mut records: Vec<JournalRecord>,
    ) -> Self {
        records.sort_by_key(|r| r.position);
        Self {
            repo,
            instance_id,
            cancel,
            cursor: Arc::new(Mutex::new(Cursor { records, next: 0 })),
        }
    }

    /// Id of the instance being driven.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Consume the next journal position, returning its existing record
    /// if this drive is replaying over it.
    fn next_position(&self) -> (u32, Option<JournalRecord>) {
        let mut cursor = self.lock_cursor();
        let position = cursor.next;
        cursor.next += 1;
        let existing = cursor
            .records
            .iter()
            .find(|r| r.position == position)
            .cloned();
        (position, existing)
    }

    fn remember(&self, record: JournalRecord) {
        let mut cursor = self.lock_cursor();
        cursor.records.push(record);
        cursor.records.sort_by_key(|r| r.position);
    }

    fn update_local(&self, position: u32, f: impl FnOnce(&mut JournalRecord)) {
        let mut cursor = self.lock_cursor();
        if let Some(record) = cursor.records.iter_mut().find(|r| r.position == position) {
            f(record);
        }
    }

    fn lock_cursor(&self) -> std::sync::MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Where this drive is suspended, if it is: the first unfinalized
    /// sleep or wait record, mapped to the instance status and due time
    /// the scheduler should persist.
    pub(crate) fn suspension(&self) -> Option<(InstanceStatus, DateTime<Utc>)> {
        let cursor = self.lock_cursor();
        cursor.records.iter().find_map(|r| match &r.entry {
            JournalEntry::Sleep { wake_at, fired: false } => {
                Some((InstanceStatus::Sleeping, *wake_at))
            }
            JournalEntry::EventWait {
                timeout_at,
                resolution: None,
                ..
            } => Some((InstanceStatus::WaitingForEvent, *timeout_at)),
            _ => None,
        })
    }

    fn warn_on_label_drift(&self, position: u32, recorded: &str, directive: &str) {
        if recorded != directive {
            tracing::warn!(
                instance_id = %self.instance_id,
                position,
                recorded,
                directive,
                "journal label differs from directive, trusting position"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Run a named step with the default retry policy.
    pub async fn step<F, Fut>(&self, label: &str, body: F) -> Result<Value, RunError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Value>> + Send,
    {
        self.step_with_policy(label, RetryPolicy::default(), body)
            .await
    }

    /// Run a named step.
    ///
    /// If the journal already holds a success for this position the body
    /// is not invoked and the stored value is returned. Otherwise the
    /// body runs under the policy's per-attempt timeout, retried with
    /// backoff up to `max_attempts`; exhaustion finalizes the record as
    /// failed and surfaces [`RunError::StepExhausted`].
    pub async fn step_with_policy<F, Fut>(
        &self,
        label: &str,
        policy: RetryPolicy,
        mut body: F,
    ) -> Result<Value, RunError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Value>> + Send,
    {
        let (position, existing) = self.next_position();

        // Replay or recover from an existing record at this position.
        let (record_id, base_attempts) = match existing {
            Some(record) => match &record.entry {
                JournalEntry::Step { attempts, outcome } => {
                    self.warn_on_label_drift(position, &record.label, label);
                    match outcome {
                        Some(StepOutcome::Success { value }) => {
                            tracing::debug!(
                                instance_id = %self.instance_id,
                                position,
                                label,
                                "replaying step from journal"
                            );
                            return Ok(value.clone());
                        }
                        Some(StepOutcome::Failed { error }) => {
                            return Err(RunError::StepExhausted {
                                label: label.to_string(),
                                attempts: *attempts,
                                error: error.clone(),
                            });
                        }
                        // Crashed mid-step: re-execute with a fresh
                        // attempt budget, accumulating the total count.
                        None => (record.id, *attempts),
                    }
                }
                other => {
                    return Err(RunError::DuplicateStepName {
                        label: label.to_string(),
                        position,
                        recorded: other.kind_name(),
                    });
                }
            },
            None => {
                let record = JournalRecord::new(
                    self.instance_id,
                    position,
                    label,
                    JournalEntry::Step {
                        attempts: 0,
                        outcome: None,
                    },
                );
                self.repo.append_record(&record).await?;
                let id = record.id;
                self.remember(record);
                (id, 0)
            }
        };

        let timeout = Duration::from_secs(
            policy
                .per_attempt_timeout_secs
                .unwrap_or(DEFAULT_ATTEMPT_TIMEOUT_SECS),
        );
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(RunError::Terminated);
            }

            attempt += 1;
            let total = base_attempts + attempt;
            self.repo.update_step_attempts(&record_id, total).await?;

            let started = std::time::Instant::now();
            let result = tokio::time::timeout(timeout, body()).await;

            // Outcomes arriving after terminate are not accepted.
            if self.cancel.is_cancelled() {
                return Err(RunError::Terminated);
            }

            let error = match result {
                Ok(Ok(value)) => {
                    let outcome = StepOutcome::Success {
                        value: value.clone(),
                    };
                    self.repo.complete_step(&record_id, &outcome, total).await?;
                    self.update_local(position, |r| {
                        r.entry = JournalEntry::Step {
                            attempts: total,
                            outcome: Some(outcome.clone()),
                        };
                        r.completed_at = Some(Utc::now());
                    });
                    tracing::info!(
                        instance_id = %self.instance_id,
                        position,
                        label,
                        attempt = total,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "step completed"
                    );
                    return Ok(value);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_elapsed) => "attempt timed out".to_string(),
            };

            if attempt >= max_attempts {
                let outcome = StepOutcome::Failed {
                    error: error.clone(),
                };
                self.repo.complete_step(&record_id, &outcome, total).await?;
                self.update_local(position, |r| {
                    r.entry = JournalEntry::Step {
                        attempts: total,
                        outcome: Some(outcome.clone()),
                    };
                    r.completed_at = Some(Utc::now());
                });
                tracing::error!(
                    instance_id = %self.instance_id,
                    position,
                    label,
                    attempts = total,
                    error = error.as_str(),
                    "step exhausted retries"
                );
                return Err(RunError::StepExhausted {
                    label: label.to_string(),
                    attempts: total,
                    error,
                });
            }

            let delay = policy.delay_for(attempt);
            tracing::warn!(
                instance_id = %self.instance_id,
                position,
                label,
                attempt = total,
                error = error.as_str(),
                retry_in_ms = delay.as_millis() as u64,
                "step attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    // -----------------------------------------------------------------------
    // Sleeps
    // -----------------------------------------------------------------------

    /// Durable sleep. The wake time is journaled on first encounter, so
    /// it holds across restarts. Suspends until the wake time passes.
    pub async fn sleep(&self, label: &str, duration: Duration) -> Result<(), RunError> {
        let (position, existing) = self.next_position();

        let (record_id, wake_at) = match existing {
            Some(record) => match &record.entry {
                JournalEntry::Sleep { wake_at, fired } => {
                    self.warn_on_label_drift(position, &record.label, label);
                    if *fired {
                        return Ok(());
                    }
                    (record.id, *wake_at)
                }
                other => {
                    return Err(RunError::DuplicateStepName {
                        label: label.to_string(),
                        position,
                        recorded: other.kind_name(),
                    });
                }
            },
            None => {
                let wake_at = Utc::now()
                    + chrono::Duration::from_std(duration)
                        .unwrap_or_else(|_| chrono::Duration::MAX);
                let record = JournalRecord::new(
                    self.instance_id,
                    position,
                    label,
                    JournalEntry::Sleep {
                        wake_at,
                        fired: false,
                    },
                );
                self.repo.append_record(&record).await?;
                let id = record.id;
                self.remember(record);
                (id, wake_at)
            }
        };

        if Utc::now() >= wake_at {
            self.repo.complete_sleep(&record_id).await?;
            self.update_local(position, |r| {
                if let JournalEntry::Sleep { fired, .. } = &mut r.entry {
                    *fired = true;
                }
                r.completed_at = Some(Utc::now());
            });
            tracing::debug!(
                instance_id = %self.instance_id,
                position,
                label,
                "sleep elapsed"
            );
            Ok(())
        } else {
            tracing::debug!(
                instance_id = %self.instance_id,
                position,
                label,
                wake_at = %wake_at,
                "suspending for sleep"
            );
            Err(RunError::Suspended)
        }
    }

    // -----------------------------------------------------------------------
    // Event waits
    // -----------------------------------------------------------------------

    /// Wait for an external event of `event_type`, up to `timeout`.
    ///
    /// The deadline is journaled on first encounter. Events submitted
    /// before the wait was reached are consumed from the buffer, oldest
    /// first. Resolves [`EventOutcome::TimedOut`] once the deadline
    /// passes with no event; suspends otherwise.
    pub async fn wait_for_event(
        &self,
        event_type: &str,
        timeout: Duration,
    ) -> Result<EventOutcome, RunError> {
        let (position, existing) = self.next_position();

        let (record_id, timeout_at) = match existing {
            Some(record) => match &record.entry {
                JournalEntry::EventWait {
                    event_type: recorded_type,
                    timeout_at,
                    resolution,
                } => {
                    self.warn_on_label_drift(position, recorded_type, event_type);
                    match resolution {
                        Some(WaitResolution::Received { payload }) => {
                            return Ok(EventOutcome::Received(payload.clone()));
                        }
                        Some(WaitResolution::TimedOut) => {
                            return Ok(EventOutcome::TimedOut);
                        }
                        None => (record.id, *timeout_at),
                    }
                }
                other => {
                    return Err(RunError::DuplicateStepName {
                        label: event_type.to_string(),
                        position,
                        recorded: other.kind_name(),
                    });
                }
            },
            None => {
                let timeout_at = Utc::now()
                    + chrono::Duration::from_std(timeout)
                        .unwrap_or_else(|_| chrono::Duration::MAX);
                let record = JournalRecord::new(
                    self.instance_id,
                    position,
                    event_type,
                    JournalEntry::EventWait {
                        event_type: event_type.to_string(),
                        timeout_at,
                        resolution: None,
                    },
                );
                self.repo.append_record(&record).await?;
                let id = record.id;
                self.remember(record);
                (id, timeout_at)
            }
        };

        // Buffered events win over the deadline.
        if let Some(event) = self.repo.pop_event(&self.instance_id, event_type).await? {
            let resolution = WaitResolution::Received {
                payload: event.payload.clone(),
            };
            self.repo.resolve_wait(&record_id, &resolution).await?;
            self.update_local(position, |r| {
                if let JournalEntry::EventWait { resolution: res, .. } = &mut r.entry {
                    *res = Some(resolution.clone());
                }
                r.completed_at = Some(Utc::now());
            });
            tracing::info!(
                instance_id = %self.instance_id,
                position,
                event_type,
                "event wait resolved"
            );
            return Ok(EventOutcome::Received(event.payload));
        }

        if Utc::now() >= timeout_at {
            self.repo
                .resolve_wait(&record_id, &WaitResolution::TimedOut)
                .await?;
            self.update_local(position, |r| {
                if let JournalEntry::EventWait { resolution: res, .. } = &mut r.entry {
                    *res = Some(WaitResolution::TimedOut);
                }
                r.completed_at = Some(Utc::now());
            });
            tracing::info!(
                instance_id = %self.instance_id,
                position,
                event_type,
                "event wait timed out"
            );
            return Ok(EventOutcome::TimedOut);
        }

        tracing::debug!(
            instance_id = %self.instance_id,
            position,
            event_type,
            timeout_at = %timeout_at,
            "suspending for event"
        );
        Err(RunError::Suspended)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
