//! Workflow instance types.
//!
//! A `WorkflowInstance` is one execution of a registered workflow,
//! identified by a unique id. The instance row is the engine's view of
//! "where is this execution right now" -- the journal (see
//! [`crate::journal`]) is the authoritative record of what already
//! happened inside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Instance status
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow instance.
///
/// Transitions are driven exclusively by the scheduler:
/// `Running -> {Sleeping, WaitingForEvent, Running} -> Complete | Errored | Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// The run function is executing (or scheduled to execute).
    Running,
    /// Suspended on a timed sleep; `wake_at` on the instance says when.
    Sleeping,
    /// Suspended waiting for an external event (or its timeout).
    WaitingForEvent,
    /// The run function returned normally; `output` holds its result.
    Complete,
    /// A step exhausted its retries; `error` holds the terminal reason.
    Errored,
    /// Forcibly stopped via terminate; no further steps execute.
    Terminated,
}

impl InstanceStatus {
    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Complete | InstanceStatus::Errored | InstanceStatus::Terminated
        )
    }
}

// ---------------------------------------------------------------------------
// WorkflowInstance
// ---------------------------------------------------------------------------

/// One running (or finished) execution of a registered workflow.
///
/// Owned exclusively by the engine: created by the registry, mutated only
/// by the scheduler. `wake_at` is a scheduling hint for the timer service;
/// it is the earliest moment the instance needs to be re-driven while
/// Sleeping or WaitingForEvent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique instance id (UUIDv7 unless the caller supplied one).
    pub id: Uuid,
    /// Name of the registered workflow this instance executes.
    pub workflow: String,
    /// Caller-supplied parameters, passed to the run function verbatim.
    pub params: serde_json::Value,
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// Final result of the run function (Complete only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Terminal failure reason (Errored only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Next due time while suspended (sleep wake or wait timeout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<DateTime<Utc>>,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the instance last changed status.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Build a fresh Running instance for a workflow.
    pub fn new(id: Uuid, workflow: &str, params: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            workflow: workflow.to_string(),
            params,
            status: InstanceStatus::Running,
            output: None,
            error: None,
            wake_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
