//! Queue envelope and wire format.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{QueueError, QueueResult};

/// Job payload data.
pub type JobData = Value;

/// One enqueued unit of work.
///
/// Serialized as JSON with the fields `id`, `time`, `delay`, `attempts`,
/// `queue` and `data`. Fields this version does not know about are kept
/// and written back when the envelope is re-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Informational identifier, not a dedup key.
    pub id: String,

    /// Enqueue time, seconds since epoch.
    pub time: i64,

    /// Seconds after `time` before the job is eligible.
    #[serde(default)]
    pub delay: i64,

    /// Delivery attempts so far.
    #[serde(default)]
    pub attempts: u32,

    /// Destination queue.
    pub queue: String,

    /// Opaque payload.
    #[serde(default)]
    pub data: JobData,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(queue: impl Into<String>, data: JobData, delay: i64) -> Self {
        Self::at(Utc::now().timestamp(), queue, data, delay)
    }

    /// Build an envelope for an explicit enqueue time. Negative delays
    /// are clamped to zero.
    pub fn at(time: i64, queue: impl Into<String>, data: JobData, delay: i64) -> Self {
        Self {
            id: generate_id(time),
            time,
            delay: delay.max(0),
            attempts: 0,
            queue: queue.into(),
            data,
            extra: Map::new(),
        }
    }

    /// Epoch second at which the job becomes eligible. Saturates at
    /// `i64::MAX` instead of wrapping.
    pub fn due_at(&self) -> i64 {
        self.time.saturating_add(self.delay)
    }

    /// Whether the envelope goes straight to the waiting list.
    pub fn is_immediate(&self) -> bool {
        self.delay == 0
    }

    /// Fields carried through from the producer that this type does not model.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Encode to the wire format.
    pub fn encode(&self) -> QueueResult<String> {
        serde_json::to_string(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Decode from the wire format.
    pub fn decode(raw: &str) -> QueueResult<Self> {
        serde_json::from_str(raw).map_err(|e| QueueError::Deserialization(e.to_string()))
    }
}

/// `{epoch_seconds}{random u32}`.
fn generate_id(time: i64) -> String {
    format!("{}{}", time, rand::random::<u32>())
}
