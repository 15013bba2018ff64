use std::sync::Arc;

use futures::future::join_all;
use shared::domain::RoomId;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    report::{BotEvent, Reporter},
    sender::{AdaptiveSender, SendOutcome},
    MessagingTransport,
};

/// Sends `text` to every room, one task per room, so a slow or unreachable
/// room only delays its own delivery.
pub async fn broadcast_welcome(
    sender: Arc<AdaptiveSender>,
    rooms: Vec<RoomId>,
    text: String,
) -> Vec<(RoomId, SendOutcome)> {
    let text: Arc<str> = Arc::from(text);
    let tasks = rooms.into_iter().map(|room| {
        let sender = Arc::clone(&sender);
        let text = Arc::clone(&text);
        tokio::spawn(async move {
            let outcome = sender.send(&room, &text).await;
            (room, outcome)
        })
    });

    join_all(tasks)
        .await
        .into_iter()
        .filter_map(|joined| match joined {
            Ok(result) => Some(result),
            Err(err) => {
                error!(%err, "welcome task aborted");
                None
            }
        })
        .collect()
}

/// Looks up the joined rooms and broadcasts the welcome text in the
/// background.
pub fn spawn_welcome_broadcast(
    transport: Arc<dyn MessagingTransport>,
    sender: Arc<AdaptiveSender>,
    text: String,
    reporter: Reporter,
) -> JoinHandle<Vec<(RoomId, SendOutcome)>> {
    tokio::spawn(async move {
        let rooms = match transport.joined_rooms().await {
            Ok(rooms) => rooms,
            Err(error) => {
                reporter.report(BotEvent::TransportFailure {
                    operation: "joined_rooms",
                    room: None,
                    error,
                });
                return Vec::new();
            }
        };
        info!(rooms = rooms.len(), "sending welcome message to joined rooms");
        let results = broadcast_welcome(sender, rooms, text).await;
        let delivered = results
            .iter()
            .filter(|(_, outcome)| outcome.is_delivered())
            .count();
        info!(
            delivered,
            failed = results.len() - delivered,
            "welcome broadcast finished"
        );
        results
    })
}

#[cfg(test)]
#[path = "tests/welcome_tests.rs"]
mod tests;
