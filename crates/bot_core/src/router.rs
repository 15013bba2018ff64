use std::sync::Arc;

use serde::Deserialize;
use shared::{
    domain::{RoomId, UserId},
    protocol::{Ciphertext, EventKind, InboundEvent},
};
use tokio::sync::mpsc;
use tracing::{info, trace};

use crate::{
    command::{CommandDispatcher, Dispatch},
    filter::StartEpoch,
    membership::AutoJoiner,
    report::{BotEvent, Reporter},
    sender::AdaptiveSender,
    GroupCrypto, MessagingTransport,
};

/// Who may issue commands through encrypted messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptedCommandPolicy {
    /// Same check as plaintext commands.
    #[default]
    CommanderOnly,
    /// Any room participant whose message decrypts.
    AnyParticipant,
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub start: StartEpoch,
    pub bot_name: String,
    pub own_user: Option<UserId>,
    pub commander: UserId,
    pub encrypted_commands: EncryptedCommandPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Shutdown,
    StreamClosed,
}

/// Entry point for every inbound event.
pub struct EventRouter {
    start: StartEpoch,
    commander: UserId,
    encrypted_commands: EncryptedCommandPolicy,
    joiner: AutoJoiner,
    dispatcher: CommandDispatcher,
    crypto: Arc<dyn GroupCrypto>,
    reporter: Reporter,
}

impl EventRouter {
    pub fn new(
        config: RouterConfig,
        transport: Arc<dyn MessagingTransport>,
        crypto: Arc<dyn GroupCrypto>,
        sender: Arc<AdaptiveSender>,
        reporter: Reporter,
    ) -> Self {
        Self {
            start: config.start,
            commander: config.commander,
            encrypted_commands: config.encrypted_commands,
            joiner: AutoJoiner::new(Arc::clone(&transport), config.own_user, reporter.clone()),
            dispatcher: CommandDispatcher::new(
                transport,
                sender,
                config.bot_name,
                reporter.clone(),
            ),
            crypto,
            reporter,
        }
    }

    /// Consumes events until a command asks for shutdown or the stream ends.
    pub async fn run(&self, mut events: mpsc::Receiver<InboundEvent>) -> RunExit {
        while let Some(event) = events.recv().await {
            if self.route(event).await == Dispatch::Shutdown {
                return RunExit::Shutdown;
            }
        }
        info!("event stream closed");
        RunExit::StreamClosed
    }

    pub async fn route(&self, event: InboundEvent) -> Dispatch {
        if self.start.is_stale(&event) {
            trace!(room = %event.room, kind = event.kind.label(), "skipping event from before startup");
            return Dispatch::Ignored;
        }

        let InboundEvent {
            room, sender, kind, ..
        } = event;
        match kind {
            EventKind::MembershipChange { target, membership } => {
                self.joiner
                    .on_membership_change(&room, &target, &membership)
                    .await;
                Dispatch::Ignored
            }
            EventKind::PlaintextMessage { body } => {
                self.reporter.report(BotEvent::MessageObserved {
                    room: room.clone(),
                    sender: sender.clone(),
                    body: body.clone(),
                    encrypted: false,
                });
                if sender != self.commander {
                    self.reporter
                        .report(BotEvent::UnauthorizedSender { room, sender });
                    return Dispatch::Ignored;
                }
                self.dispatcher.handle(&body, &room).await
            }
            EventKind::EncryptedMessage { ciphertext } => {
                self.route_encrypted(room, sender, &ciphertext).await
            }
        }
    }

    async fn route_encrypted(
        &self,
        room: RoomId,
        sender: UserId,
        ciphertext: &Ciphertext,
    ) -> Dispatch {
        let decrypted = match self.crypto.decrypt_group_message(&room, ciphertext).await {
            Ok(decrypted) => decrypted,
            Err(error) => {
                self.reporter.report(BotEvent::DecryptionFailed {
                    room,
                    sender,
                    error,
                });
                return Dispatch::Ignored;
            }
        };

        self.reporter.report(BotEvent::MessageObserved {
            room: room.clone(),
            sender: decrypted.sender.clone(),
            body: decrypted.body.clone(),
            encrypted: true,
        });
        if self.encrypted_commands == EncryptedCommandPolicy::CommanderOnly
            && decrypted.sender != self.commander
        {
            self.reporter.report(BotEvent::UnauthorizedSender {
                room,
                sender: decrypted.sender,
            });
            return Dispatch::Ignored;
        }
        self.dispatcher.handle(&decrypted.body, &room).await
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
