use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{EventId, Membership, RoomId, UserId};

pub const EVENT_TYPE_MESSAGE: &str = "m.room.message";
pub const EVENT_TYPE_ENCRYPTED: &str = "m.room.encrypted";
pub const EVENT_TYPE_ENCRYPTION: &str = "m.room.encryption";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub room: RoomId,
    pub sender: UserId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    MembershipChange {
        target: UserId,
        membership: Membership,
    },
    PlaintextMessage {
        body: String,
    },
    EncryptedMessage {
        ciphertext: Ciphertext,
    },
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MembershipChange { .. } => "membership_change",
            Self::PlaintextMessage { .. } => "plaintext_message",
            Self::EncryptedMessage { .. } => "encrypted_message",
        }
    }
}

/// Opaque handle to a room event that arrived encrypted, handed to the
/// crypto collaborator untouched. `content` is the event as the transport
/// delivered it: still `m.room.encrypted` when no key was available yet, or
/// the cleartext event when the client decrypted it during sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ciphertext {
    pub event_id: Option<EventId>,
    pub content: Value,
}

/// `m.room.message` content cleared by the crypto collaborator for the
/// room's current group session. The transport seals it with that session
/// while sending and never delivers it in the clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupPayload(pub Value);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedMessage {
    pub sender: UserId,
    pub body: String,
}
