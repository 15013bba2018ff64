use std::sync::Arc;

use shared::{
    domain::RoomId,
    error::{CryptoError, SessionFault, TransportError},
};
use thiserror::Error;
use tracing::info;

use crate::{
    encryption_policy::EncryptionPolicy,
    report::{BotEvent, Reporter},
    GroupCrypto, MessagingTransport,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("delivery failed: {0}")]
    Transport(TransportError),
    #[error("encryption failed: {0}")]
    Crypto(CryptoError),
    #[error("failed to enumerate room members for group session: {0}")]
    MemberLookup(TransportError),
    #[error("failed to establish group session: {0}")]
    Establish(CryptoError),
    #[error("group session still {fault} after re-establishment")]
    SessionRetryExhausted { fault: SessionFault },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    EstablishedAndDelivered,
    Failed(SendError),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Delivers a text body to a room, encrypting it when the room asks for it.
///
/// An unusable group session (missing, expired or not shared with the
/// current members) is repaired at most once per call: the session is
/// re-established for the room's joined members and the message is encrypted
/// again. Everything else fails the call with a [`SendError`].
pub struct AdaptiveSender {
    transport: Arc<dyn MessagingTransport>,
    crypto: Arc<dyn GroupCrypto>,
    policy: EncryptionPolicy,
    reporter: Reporter,
}

impl AdaptiveSender {
    pub fn new(
        transport: Arc<dyn MessagingTransport>,
        crypto: Arc<dyn GroupCrypto>,
        reporter: Reporter,
    ) -> Self {
        Self {
            policy: EncryptionPolicy::new(Arc::clone(&transport)),
            transport,
            crypto,
            reporter,
        }
    }

    pub async fn send(&self, room: &RoomId, body: &str) -> SendOutcome {
        let outcome = self.deliver(room, body).await;
        self.reporter.report(BotEvent::SendCompleted {
            room: room.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn deliver(&self, room: &RoomId, body: &str) -> SendOutcome {
        if !self.policy.requires_encryption(room).await {
            return match self.transport.send_text(room, body).await {
                Ok(_) => SendOutcome::Delivered,
                Err(error) => SendOutcome::Failed(SendError::Transport(error)),
            };
        }

        let fault = match self.encrypt_and_deliver(room, body).await {
            Ok(()) => return SendOutcome::Delivered,
            Err(SendError::Crypto(CryptoError::Session { fault, .. })) => fault,
            Err(error) => return SendOutcome::Failed(error),
        };

        info!(room = %room, %fault, "group session unusable; establishing a new one");
        let members = match self.transport.joined_members(room).await {
            Ok(members) => members,
            Err(error) => return SendOutcome::Failed(SendError::MemberLookup(error)),
        };
        if let Err(error) = self.crypto.establish_group_session(room, &members).await {
            return SendOutcome::Failed(SendError::Establish(error));
        }

        match self.encrypt_and_deliver(room, body).await {
            Ok(()) => SendOutcome::EstablishedAndDelivered,
            Err(SendError::Crypto(CryptoError::Session { fault, .. })) => {
                SendOutcome::Failed(SendError::SessionRetryExhausted { fault })
            }
            Err(error) => SendOutcome::Failed(error),
        }
    }

    async fn encrypt_and_deliver(&self, room: &RoomId, body: &str) -> Result<(), SendError> {
        let payload = self
            .crypto
            .encrypt_group_message(room, body)
            .await
            .map_err(SendError::Crypto)?;
        self.transport
            .send_encrypted(room, &payload)
            .await
            .map_err(SendError::Transport)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/sender_tests.rs"]
mod tests;
