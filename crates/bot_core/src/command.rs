use std::sync::Arc;

use shared::domain::RoomId;
use tracing::debug;

use crate::{
    report::{BotEvent, Reporter},
    sender::AdaptiveSender,
    MessagingTransport,
};

/// Separates the bot's display name from the command, as in `james: ping`.
pub const COMMAND_SEPARATOR: &str = ": ";
pub const PING_REPLY: &str = "pong";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Logout,
    Leave,
    Unknown(String),
}

impl Command {
    pub fn from_key(key: &str) -> Self {
        match key {
            "ping" => Self::Ping,
            "logout" => Self::Logout,
            "leave" => Self::Leave,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Logout => "logout",
            Self::Leave => "leave",
            Self::Unknown(key) => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Command,
    /// Tokens after the command key. No command takes arguments yet.
    pub args: Vec<String>,
}

/// Extracts the command addressed to `bot_name`, if any.
pub fn parse_command(raw_body: &str, bot_name: &str) -> Option<ParsedCommand> {
    let remainder = raw_body
        .trim()
        .strip_prefix(bot_name)?
        .strip_prefix(COMMAND_SEPARATOR)?;
    let mut tokens = remainder.split_whitespace();
    let command = Command::from_key(tokens.next()?);
    Some(ParsedCommand {
        command,
        args: tokens.map(str::to_string).collect(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Not addressed to the bot, or not a known command.
    Ignored,
    Handled,
    /// The account was logged out; the process should exit successfully.
    Shutdown,
}

pub struct CommandDispatcher {
    transport: Arc<dyn MessagingTransport>,
    sender: Arc<AdaptiveSender>,
    bot_name: String,
    reporter: Reporter,
}

impl CommandDispatcher {
    pub fn new(
        transport: Arc<dyn MessagingTransport>,
        sender: Arc<AdaptiveSender>,
        bot_name: impl Into<String>,
        reporter: Reporter,
    ) -> Self {
        Self {
            transport,
            sender,
            bot_name: bot_name.into(),
            reporter,
        }
    }

    /// Failures are reported, never answered in the room.
    pub async fn handle(&self, raw_body: &str, room: &RoomId) -> Dispatch {
        let Some(parsed) = parse_command(raw_body, &self.bot_name) else {
            return Dispatch::Ignored;
        };
        if let Command::Unknown(key) = &parsed.command {
            debug!(room = %room, key = %key, "ignoring unknown command");
            return Dispatch::Ignored;
        }
        self.reporter.report(BotEvent::CommandDispatched {
            room: room.clone(),
            command: parsed.command.clone(),
        });

        match parsed.command {
            Command::Ping => {
                self.sender.send(room, PING_REPLY).await;
                Dispatch::Handled
            }
            Command::Leave => {
                match self.transport.leave_room(room).await {
                    Ok(()) => self.reporter.report(BotEvent::RoomLeft { room: room.clone() }),
                    Err(error) => self.reporter.report(BotEvent::TransportFailure {
                        operation: "leave_room",
                        room: Some(room.clone()),
                        error,
                    }),
                }
                Dispatch::Handled
            }
            Command::Logout => {
                logout(self.transport.as_ref(), &self.reporter).await;
                Dispatch::Shutdown
            }
            Command::Unknown(_) => Dispatch::Ignored,
        }
    }
}

/// Logs the account out and reports the result. Callers terminate the
/// process afterwards whatever the result was.
pub async fn logout(transport: &dyn MessagingTransport, reporter: &Reporter) {
    match transport.logout().await {
        Ok(()) => reporter.report(BotEvent::LoggedOut),
        Err(error) => reporter.report(BotEvent::TransportFailure {
            operation: "logout",
            room: None,
            error,
        }),
    }
}

#[cfg(test)]
#[path = "tests/command_tests.rs"]
mod tests;
