use serde::{Deserialize, Serialize};
use uuid::Uuid;

use creditkit_core::UserId;

/// Envelope for an event, containing per-user stream metadata.
///
/// This is the unit appended to (and replayed from) a user's event stream.
///
/// Notes:
/// - Streams are **per user**: one credit account per user, so `user_id` is
///   both the owner and the stream key.
/// - **Append-only**: `sequence_number` is monotonically increasing per stream,
///   starting at 1.
/// - `payload` is the domain-agnostic event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    user_id: UserId,

    /// Monotonically increasing position in the user's stream.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(event_id: Uuid, user_id: UserId, sequence_number: u64, payload: E) -> Self {
        Self {
            event_id,
            user_id,
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
