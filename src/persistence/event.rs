//! Event types for the car journal.
//!
//! These events are appended to the journal in JSON Lines format.
//! Each event has a monotonic sequence number and timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Car, DequeueCause, MergeRequestId, TrainKey};

/// An event in the journal.
///
/// The payload is flattened into the event object.
///
/// Example JSON:
/// ```json
/// {"seq":1,"ts":"2024-01-15T10:00:00Z","type":"car_dequeued","train":{"project":1,"target_branch":"main"},"merge_request":7,"cause":"merged"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEvent {
    /// Monotonic sequence number. Used for replay positioning and ordering.
    pub seq: u64,

    /// Timestamp when the event was created (UTC).
    pub ts: DateTime<Utc>,

    #[serde(flatten)]
    pub payload: StateEventPayload,
}

impl StateEvent {
    /// Creates a new event with the given sequence number and payload.
    pub fn new(seq: u64, payload: StateEventPayload) -> Self {
        StateEvent {
            seq,
            ts: Utc::now(),
            payload,
        }
    }

    /// Returns true if this event requires immediate fsync.
    pub fn is_critical(&self) -> bool {
        self.payload.is_critical()
    }
}

/// Event payload types for the journal.
///
/// Serialized with internal tagging: `{"type": "car_enqueued", "car": {...}, ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEventPayload {
    /// A car joined a train at `position`.
    ///
    /// Replaying inserts at the same position, shifting cars behind it the
    /// same way the live insert did.
    CarEnqueued { car: Car, position: i64 },

    /// A car changed status (merging, merged, released).
    CarTransitioned { car: Car },

    /// A car's build or pipeline changed without a status change.
    ///
    /// Losing one of these only costs a rebuild on the next refresh.
    CarUpdated { car: Car },

    /// A car left its train.
    CarDequeued {
        train: TrainKey,
        merge_request: MergeRequestId,
        cause: DequeueCause,
    },
}

impl StateEventPayload {
    /// Returns true if this event type requires immediate fsync.
    pub fn is_critical(&self) -> bool {
        !matches!(self, StateEventPayload::CarUpdated { .. })
    }

    /// Returns the merge request this event concerns.
    pub fn merge_request(&self) -> MergeRequestId {
        match self {
            StateEventPayload::CarEnqueued { car, .. }
            | StateEventPayload::CarTransitioned { car }
            | StateEventPayload::CarUpdated { car } => car.merge_request_id,
            StateEventPayload::CarDequeued { merge_request, .. } => *merge_request,
        }
    }
}
