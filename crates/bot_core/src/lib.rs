use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::{EventId, RoomId, UserId},
    error::{CryptoError, TransportError},
    protocol::{Ciphertext, DecryptedMessage, GroupPayload},
};

pub mod command;
pub mod encryption_policy;
pub mod filter;
pub mod membership;
pub mod report;
pub mod router;
pub mod sender;
pub mod welcome;

pub use command::{parse_command, Command, CommandDispatcher, Dispatch, ParsedCommand};
pub use encryption_policy::EncryptionPolicy;
pub use filter::StartEpoch;
pub use membership::{AutoJoiner, MembershipAction};
pub use report::{BotEvent, Reporter};
pub use router::{EncryptedCommandPolicy, EventRouter, RouterConfig, RunExit};
pub use sender::{AdaptiveSender, SendError, SendOutcome};
pub use welcome::{broadcast_welcome, spawn_welcome_broadcast};

/// Room-level operations of the secure-messaging transport.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    async fn send_text(&self, room: &RoomId, body: &str) -> Result<EventId, TransportError>;
    async fn send_encrypted(
        &self,
        room: &RoomId,
        payload: &GroupPayload,
    ) -> Result<EventId, TransportError>;
    async fn join_room(&self, room: &RoomId) -> Result<(), TransportError>;
    async fn leave_room(&self, room: &RoomId) -> Result<(), TransportError>;
    async fn logout(&self) -> Result<(), TransportError>;
    async fn joined_rooms(&self) -> Result<Vec<RoomId>, TransportError>;
    async fn joined_members(&self, room: &RoomId) -> Result<Vec<UserId>, TransportError>;
    async fn room_state(
        &self,
        room: &RoomId,
        event_type: &str,
        state_key: &str,
    ) -> Result<Value, TransportError>;
}

/// Group-ratchet operations of the crypto collaborator.
#[async_trait]
pub trait GroupCrypto: Send + Sync {
    /// Prepares `body` for the room's current group session. A
    /// [`CryptoError::Session`] means the session has to be established
    /// again before the message can go out.
    async fn encrypt_group_message(
        &self,
        room: &RoomId,
        body: &str,
    ) -> Result<GroupPayload, CryptoError>;
    async fn establish_group_session(
        &self,
        room: &RoomId,
        members: &[UserId],
    ) -> Result<(), CryptoError>;
    async fn decrypt_group_message(
        &self,
        room: &RoomId,
        ciphertext: &Ciphertext,
    ) -> Result<DecryptedMessage, CryptoError>;
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
