use std::sync::Arc;

use shared::domain::{Membership, RoomId, UserId};
use tracing::debug;

use crate::{
    report::{BotEvent, Reporter},
    MessagingTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipAction {
    Ignored,
    Joined,
    JoinFailed,
}

/// Joins every room the bot gets invited to.
pub struct AutoJoiner {
    transport: Arc<dyn MessagingTransport>,
    own_user: Option<UserId>,
    reporter: Reporter,
}

impl AutoJoiner {
    /// With `own_user` set, invitations addressed to other users are ignored.
    pub fn new(
        transport: Arc<dyn MessagingTransport>,
        own_user: Option<UserId>,
        reporter: Reporter,
    ) -> Self {
        Self {
            transport,
            own_user,
            reporter,
        }
    }

    pub async fn on_membership_change(
        &self,
        room: &RoomId,
        target: &UserId,
        membership: &Membership,
    ) -> MembershipAction {
        if *membership != Membership::Invite {
            debug!(room = %room, target = %target, %membership, "membership change needs no action");
            return MembershipAction::Ignored;
        }
        if self.own_user.as_ref().is_some_and(|own| own != target) {
            debug!(room = %room, target = %target, "invite is for another user");
            return MembershipAction::Ignored;
        }

        match self.transport.join_room(room).await {
            Ok(()) => {
                self.reporter.report(BotEvent::Joined { room: room.clone() });
                MembershipAction::Joined
            }
            Err(error) => {
                self.reporter.report(BotEvent::TransportFailure {
                    operation: "join_room",
                    room: Some(room.clone()),
                    error,
                });
                MembershipAction::JoinFailed
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/membership_tests.rs"]
mod tests;
