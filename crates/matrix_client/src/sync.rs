use std::time::Duration;

use chrono::{DateTime, Utc};
use matrix_sdk::{
    config::SyncSettings,
    deserialized_responses::EncryptionInfo,
    ruma::{
        events::room::{
            encrypted::OriginalSyncRoomEncryptedEvent,
            member::StrippedRoomMemberEvent,
            message::{MessageType, OriginalSyncRoomMessageEvent},
        },
        serde::Raw,
    },
    Client, LoopCtrl, Room,
};
use serde_json::{json, Value};
use shared::{
    domain::{EventId, Membership, RoomId, UserId},
    error::TransportError,
    protocol::{Ciphertext, EventKind, InboundEvent, EVENT_TYPE_MESSAGE},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::sdk_error;

const SYNC_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Fills the client's room list and moves its sync token past the history
/// already on the server. Event handlers are registered afterwards, so
/// nothing from this batch is routed.
pub async fn initial_sync(client: &Client) -> Result<(), TransportError> {
    client
        .sync_once(SyncSettings::new())
        .await
        .map_err(|err| sdk_error("initial_sync", err))?;
    Ok(())
}

/// Registers the event handlers and keeps syncing in the background until
/// the receiver of `events` is dropped. The SDK processes to-device
/// messages and device list changes of every response before the handlers
/// run, so room keys are in place for the timeline they belong to.
pub fn spawn_sync(
    client: Client,
    events: mpsc::Sender<InboundEvent>,
    timeout: Duration,
) -> JoinHandle<()> {
    register_handlers(&client, &events);
    tokio::spawn(async move {
        let settings = SyncSettings::new().timeout(timeout);
        let result = client
            .sync_with_result_callback(settings, |sync_result| {
                let events = events.clone();
                async move {
                    if events.is_closed() {
                        debug!("event receiver dropped, stopping sync");
                        return Ok::<LoopCtrl, matrix_sdk::Error>(LoopCtrl::Break);
                    }
                    if let Err(err) = sync_result {
                        warn!(%err, "sync failed, retrying");
                        tokio::time::sleep(SYNC_RETRY_DELAY).await;
                    }
                    Ok::<LoopCtrl, matrix_sdk::Error>(LoopCtrl::Continue)
                }
            })
            .await;
        if let Err(err) = result {
            error!(%err, "sync loop stopped");
        }
    })
}

fn register_handlers(client: &Client, events: &mpsc::Sender<InboundEvent>) {
    let sink = events.clone();
    client.add_event_handler(
        move |event: OriginalSyncRoomMessageEvent,
              room: Room,
              client: Client,
              encryption: Option<EncryptionInfo>| {
            let sink = sink.clone();
            async move {
                if is_own(&client, event.sender.as_str()) {
                    return;
                }
                let MessageType::Text(text) = &event.content.msgtype else {
                    return;
                };
                let inbound = message_event(
                    RoomId::new(room.room_id().as_str()),
                    UserId::new(event.sender.as_str()),
                    timestamp_from_millis(u64::from(event.origin_server_ts.0)),
                    EventId::new(event.event_id.as_str()),
                    &text.body,
                    encryption.is_some(),
                );
                forward(&sink, inbound).await;
            }
        },
    );

    // Only events the SDK could not decrypt during sync arrive here.
    let sink = events.clone();
    client.add_event_handler(
        move |raw: Raw<OriginalSyncRoomEncryptedEvent>, room: Room| {
            let sink = sink.clone();
            async move {
                let event = match raw.deserialize() {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(%err, "dropping malformed encrypted event");
                        return;
                    }
                };
                let content: Value = match serde_json::from_str(raw.json().get()) {
                    Ok(content) => content,
                    Err(err) => {
                        warn!(%err, "dropping malformed encrypted event");
                        return;
                    }
                };
                let inbound = undecrypted_event(
                    RoomId::new(room.room_id().as_str()),
                    UserId::new(event.sender.as_str()),
                    timestamp_from_millis(u64::from(event.origin_server_ts.0)),
                    EventId::new(event.event_id.as_str()),
                    content,
                );
                forward(&sink, inbound).await;
            }
        },
    );

    let sink = events.clone();
    client.add_event_handler(
        move |event: StrippedRoomMemberEvent, room: Room, client: Client| {
            let sink = sink.clone();
            async move {
                if !is_own(&client, event.state_key.as_str()) {
                    return;
                }
                // Stripped invite state carries no timestamp.
                let inbound = membership_event(
                    RoomId::new(room.room_id().as_str()),
                    UserId::new(event.sender.as_str()),
                    UserId::new(event.state_key.as_str()),
                    event.content.membership.as_str(),
                    Utc::now(),
                );
                forward(&sink, inbound).await;
            }
        },
    );
}

fn is_own(client: &Client, user: &str) -> bool {
    client.user_id().is_some_and(|own| own.as_str() == user)
}

async fn forward(sink: &mpsc::Sender<InboundEvent>, event: InboundEvent) {
    if sink.send(event).await.is_err() {
        debug!("event receiver dropped; discarding event");
    }
}

/// Out-of-range timestamps map to the Unix epoch, which every start epoch
/// treats as stale.
fn timestamp_from_millis(millis: u64) -> DateTime<Utc> {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// A text message. One that arrived encrypted and was decrypted by the SDK
/// keeps its encrypted classification and carries the cleartext event.
fn message_event(
    room: RoomId,
    sender: UserId,
    timestamp: DateTime<Utc>,
    event_id: EventId,
    body: &str,
    arrived_encrypted: bool,
) -> InboundEvent {
    let kind = if arrived_encrypted {
        EventKind::EncryptedMessage {
            ciphertext: Ciphertext {
                content: json!({
                    "type": EVENT_TYPE_MESSAGE,
                    "sender": sender,
                    "event_id": event_id,
                    "content": { "msgtype": "m.text", "body": body },
                }),
                event_id: Some(event_id),
            },
        }
    } else {
        EventKind::PlaintextMessage {
            body: body.to_string(),
        }
    };
    InboundEvent {
        room,
        sender,
        timestamp,
        kind,
    }
}

fn undecrypted_event(
    room: RoomId,
    sender: UserId,
    timestamp: DateTime<Utc>,
    event_id: EventId,
    event: Value,
) -> InboundEvent {
    InboundEvent {
        room,
        sender,
        timestamp,
        kind: EventKind::EncryptedMessage {
            ciphertext: Ciphertext {
                event_id: Some(event_id),
                content: event,
            },
        },
    }
}

fn membership_event(
    room: RoomId,
    sender: UserId,
    target: UserId,
    membership: &str,
    received_at: DateTime<Utc>,
) -> InboundEvent {
    InboundEvent {
        room,
        sender,
        timestamp: received_at,
        kind: EventKind::MembershipChange {
            target,
            membership: Membership::parse(membership),
        },
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
