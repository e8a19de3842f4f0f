//! Journal record types: the per-instance replay log.
//!
//! Every directive a run function reaches (step, sleep, event wait) gets
//! exactly one `JournalRecord`, keyed by a per-instance monotonic
//! `position`. The position is authoritative for replay matching; the
//! human-readable `label` is descriptive only. A record is created when
//! its directive is first encountered and finalized exactly once -- a
//! finalized `Success` outcome is immutable and authoritative for all
//! future replays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Outcomes and resolutions
// ---------------------------------------------------------------------------

/// Terminal outcome of a step directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step body returned a value; it will never be re-executed.
    Success { value: serde_json::Value },
    /// All retry attempts were exhausted.
    Failed { error: String },
}

/// How an event wait resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WaitResolution {
    /// A matching external event was delivered.
    Received { payload: serde_json::Value },
    /// The wait's deadline elapsed with no event. Not an error.
    TimedOut,
}

// ---------------------------------------------------------------------------
// Journal entry
// ---------------------------------------------------------------------------

/// The directive-specific body of a journal record.
///
/// Internally tagged by `kind`, matching the stored JSON:
/// ```json
/// { "kind": "step", "attempts": 2, "outcome": { "status": "success", "value": [1, 2, 3] } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    /// A named unit of work executed at most once to success.
    Step {
        /// Number of body invocations so far (1-based after the first).
        attempts: u32,
        /// Terminal outcome, absent while the step is in flight.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outcome: Option<StepOutcome>,
    },
    /// A timed suspension.
    Sleep {
        /// Absolute wake time, fixed when the directive is first reached.
        wake_at: DateTime<Utc>,
        /// Whether the sleep has been observed as elapsed.
        fired: bool,
    },
    /// A suspension until an external event (or its deadline).
    EventWait {
        /// Event type to match.
        event_type: String,
        /// Absolute deadline after which the wait resolves `TimedOut`.
        timeout_at: DateTime<Utc>,
        /// Resolution, absent while still waiting.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resolution: Option<WaitResolution>,
    },
}

impl JournalEntry {
    /// Short kind name, used in logs and mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            JournalEntry::Step { .. } => "step",
            JournalEntry::Sleep { .. } => "sleep",
            JournalEntry::EventWait { .. } => "event_wait",
        }
    }

    /// Whether this entry has reached its terminal form.
    pub fn is_finalized(&self) -> bool {
        match self {
            JournalEntry::Step { outcome, .. } => outcome.is_some(),
            JournalEntry::Sleep { fired, .. } => *fired,
            JournalEntry::EventWait { resolution, .. } => resolution.is_some(),
        }
    }
}

// ---------------------------------------------------------------------------
// JournalRecord
// ---------------------------------------------------------------------------

/// One row of an instance's replay log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    /// UUIDv7 record id.
    pub id: Uuid,
    /// Owning instance.
    pub instance_id: Uuid,
    /// Per-instance monotonic directive index. Authoritative for replay.
    pub position: u32,
    /// Human-readable directive label. Descriptive only.
    pub label: String,
    /// Directive-specific body.
    pub entry: JournalEntry,
    /// When the directive was first reached.
    pub created_at: DateTime<Utc>,
    /// When the entry was finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JournalRecord {
    /// Build a fresh, unfinalized record for a directive.
    pub fn new(instance_id: Uuid, position: u32, label: &str, entry: JournalEntry) -> Self {
        Self {
            id: Uuid::now_v7(),
            instance_id,
            position,
            label: label.to_string(),
            entry,
            created_at: Utc::now(),
            completed_at: None,
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

    #[test]
    fn test_step_entry_serde_tagging() {
        let entry = JournalEntry::Step {
            attempts: 2,
            outcome: Some(StepOutcome::Success {
                value: json!([1, 2, 3]),
            }),
        };
        let s = serde_json::to_string(&entry).unwrap();
        assert!(s.contains("\"kind\":\"step\""));
        assert!(s.contains("\"status\":\"success\""));
        let parsed: JournalEntry = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_sleep_entry_serde() {
        let entry = JournalEntry::Sleep {
            wake_at: Utc::now(),
            fired: false,
        };
        let s = serde_json::to_string(&entry).unwrap();
        assert!(s.contains("\"kind\":\"sleep\""));
        let parsed: JournalEntry = serde_json::from_str(&s).unwrap();
        assert!(matches!(parsed, JournalEntry::Sleep { fired: false, .. }));
    }

    #[test]
    fn test_event_wait_entry_serde() {
        let entry = JournalEntry::EventWait {
            event_type: "approval".to_string(),
            timeout_at: Utc::now(),
            resolution: Some(WaitResolution::TimedOut),
        };
        let s = serde_json::to_string(&entry).unwrap();
        assert!(s.contains("\"kind\":\"event_wait\""));
        assert!(s.contains("\"result\":\"timed_out\""));
        let parsed: JournalEntry = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_finalized_detection() {
        let open = JournalEntry::Step {
            attempts: 1,
            outcome: None,
        };
        assert!(!open.is_finalized());

        let done = JournalEntry::Step {
            attempts: 1,
            outcome: Some(StepOutcome::Failed {
                error: "boom".to_string(),
            }),
        };
        assert!(done.is_finalized());

        let waiting = JournalEntry::EventWait {
            event_type: "approval".to_string(),
            timeout_at: Utc::now(),
            resolution: None,
        };
        assert!(!waiting.is_finalized());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(
            JournalEntry::Step {
                attempts: 0,
                outcome: None
            }
            .kind_name(),
            "step"
        );
        assert_eq!(
            JournalEntry::Sleep {
                wake_at: Utc::now(),
                fired: true
            }
            .kind_name(),
            "sleep"
        );
    }

    #[test]
    fn test_record_roundtrip() {
        let rec = JournalRecord::new(
            Uuid::now_v7(),
            0,
            "fetch-list",
            JournalEntry::Step {
                attempts: 1,
                outcome: Some(StepOutcome::Success {
                    value: json!([1, 2, 3]),
                }),
            },
        );
        let s = serde_json::to_string(&rec).unwrap();
        let parsed: JournalRecord = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed.position, 0);
        assert_eq!(parsed.label, "fetch-list");
        assert!(parsed.entry.is_finalized());
    }
}
