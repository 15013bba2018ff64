use std::sync::Arc;

use serde_json::Value;
use shared::{domain::RoomId, protocol::EVENT_TYPE_ENCRYPTION};
use tracing::debug;

use crate::MessagingTransport;

/// Answers whether a room currently requires encrypted delivery.
///
/// The answer is looked up on every call: a room can turn encryption on in
/// the middle of a conversation. Lookup failures read as "not required".
pub struct EncryptionPolicy {
    transport: Arc<dyn MessagingTransport>,
}

impl EncryptionPolicy {
    pub fn new(transport: Arc<dyn MessagingTransport>) -> Self {
        Self { transport }
    }

    pub async fn requires_encryption(&self, room: &RoomId) -> bool {
        match self
            .transport
            .room_state(room, EVENT_TYPE_ENCRYPTION, "")
            .await
        {
            Ok(content) => declares_algorithm(&content),
            Err(error) => {
                if !error.is_not_found() {
                    debug!(room = %room, %error, "encryption state lookup failed; sending plaintext");
                }
                false
            }
        }
    }
}

fn declares_algorithm(content: &Value) -> bool {
    content
        .get("algorithm")
        .and_then(Value::as_str)
        .is_some_and(|algorithm| !algorithm.is_empty())
}

#[cfg(test)]
#[path = "tests/encryption_policy_tests.rs"]
mod tests;
