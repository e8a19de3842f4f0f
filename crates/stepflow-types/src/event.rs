//! Buffered external events.
//!
//! Events delivered to an instance that is not currently waiting are not
//! dropped: they are buffered per `(instance, event_type)` and replayed
//! FIFO when a matching wait is reached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An external event delivered to a workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedEvent {
    /// UUIDv7 event id; its time ordering is the FIFO order.
    pub id: Uuid,
    /// Instance the event was addressed to.
    pub instance_id: Uuid,
    /// Event type used to match waits.
    pub event_type: String,
    /// Caller-supplied payload, delivered to the wait verbatim.
    pub payload: serde_json::Value,
    /// When the event arrived.
    pub received_at: DateTime<Utc>,
}

impl BufferedEvent {
    pub fn new(instance_id: Uuid, event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            instance_id,
            event_type: event_type.to_string(),
            payload,
            received_at: Utc::now(),
        }
    }
}
