use shared::{
    domain::{RoomId, UserId},
    error::{CryptoError, TransportError},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{command::Command, sender::SendOutcome};

#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    Joined {
        room: RoomId,
    },
    RoomLeft {
        room: RoomId,
    },
    LoggedOut,
    TransportFailure {
        operation: &'static str,
        room: Option<RoomId>,
        error: TransportError,
    },
    MessageObserved {
        room: RoomId,
        sender: UserId,
        body: String,
        encrypted: bool,
    },
    UnauthorizedSender {
        room: RoomId,
        sender: UserId,
    },
    DecryptionFailed {
        room: RoomId,
        sender: UserId,
        error: CryptoError,
    },
    CommandDispatched {
        room: RoomId,
        command: Command,
    },
    SendCompleted {
        room: RoomId,
        outcome: SendOutcome,
    },
}

/// Reporting capability handed to every component at construction.
///
/// Each report is written to the `tracing` pipeline and published to
/// subscribers, which lets tests observe exactly what a component did.
#[derive(Clone)]
pub struct Reporter {
    events: broadcast::Sender<BotEvent>,
}

impl Reporter {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.events.subscribe()
    }

    pub fn report(&self, event: BotEvent) {
        log_event(&event);
        let _ = self.events.send(event);
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(256)
    }
}

fn log_event(event: &BotEvent) {
    match event {
        BotEvent::Joined { room } => info!(room = %room, "joined room after invite"),
        BotEvent::RoomLeft { room } => info!(room = %room, "left room"),
        BotEvent::LoggedOut => info!("logout successful"),
        BotEvent::TransportFailure {
            operation,
            room: Some(room),
            error,
        } => error!(operation, room = %room, %error, "transport operation failed"),
        BotEvent::TransportFailure {
            operation,
            room: None,
            error,
        } => error!(operation, %error, "transport operation failed"),
        BotEvent::MessageObserved {
            room,
            sender,
            body,
            encrypted,
        } => info!(room = %room, sender = %sender, encrypted, body = %body, "message received"),
        BotEvent::UnauthorizedSender { room, sender } => {
            debug!(room = %room, sender = %sender, "sender is not the commander; not dispatching")
        }
        BotEvent::DecryptionFailed {
            room,
            sender,
            error,
        } => error!(room = %room, sender = %sender, %error, "failed to decrypt event; dropping"),
        BotEvent::CommandDispatched { room, command } => {
            info!(room = %room, command = command.name(), "dispatching command")
        }
        BotEvent::SendCompleted { room, outcome } => match outcome {
            SendOutcome::Delivered => debug!(room = %room, "message delivered"),
            SendOutcome::EstablishedAndDelivered => {
                info!(room = %room, "message delivered after group session establishment")
            }
            SendOutcome::Failed(error) => {
                warn!(room = %room, %error, "message delivery failed")
            }
        },
    }
}

#[cfg(test)]
#[path = "tests/report_tests.rs"]
mod tests;
