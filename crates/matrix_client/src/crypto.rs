use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bot_core::GroupCrypto;
use matrix_sdk::{
    crypto::MegolmError,
    ruma::{
        events::room::encrypted::OriginalSyncRoomEncryptedEvent, serde::Raw, OwnedUserId,
    },
    Client, Room, RoomMemberships,
};
use serde_json::{json, Value};
use shared::{
    domain::{RoomId, UserId},
    error::{CryptoError, SessionFault},
    protocol::{Ciphertext, DecryptedMessage, GroupPayload, EVENT_TYPE_ENCRYPTED},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default `rotation_period_ms` of `m.room.encryption`: one week.
pub const DEFAULT_ROTATION_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// The parts of the client's end-to-end machinery the group crypto needs.
///
/// The SDK keeps the Olm account, the outbound Megolm sessions and the
/// to-device traffic to itself: key claims, device list updates and incoming
/// room keys are processed on every sync, and a message is sealed with the
/// room's outbound session when it is sent.
#[async_trait]
pub trait RoomEncryption: Send + Sync {
    /// Rotation period of the room's group sessions, or `None` when the
    /// client holds no encryption state for the room.
    async fn rotation_period(&self, room: &RoomId) -> Result<Option<Duration>, CryptoError>;
    /// Joined members as currently known to the client, without a request.
    async fn known_members(&self, room: &RoomId) -> Result<Vec<UserId>, CryptoError>;
    /// Loads the full member list and the device keys of `members`.
    async fn track_members(&self, room: &RoomId, members: &[UserId]) -> Result<(), CryptoError>;
    /// Drops the outbound group session; the next send creates a new one and
    /// shares it with every device of the current members.
    async fn rotate_room_key(&self, room: &RoomId) -> Result<(), CryptoError>;
    /// Decrypts a raw `m.room.encrypted` event into the cleartext event.
    async fn decrypt(&self, room: &RoomId, event: &Value) -> Result<Value, CryptoError>;
}

fn joined_room(client: &Client, room: &RoomId) -> Result<Room, CryptoError> {
    let room_id = crate::ruma_room_id("group_crypto", room)
        .map_err(|err| CryptoError::Fatal(err.to_string()))?;
    client
        .get_room(&room_id)
        .ok_or_else(|| CryptoError::Fatal(format!("room {room} is not known to the client")))
}

fn fatal(err: impl ToString) -> CryptoError {
    CryptoError::Fatal(err.to_string())
}

#[async_trait]
impl RoomEncryption for Client {
    async fn rotation_period(&self, room: &RoomId) -> Result<Option<Duration>, CryptoError> {
        Ok(joined_room(self, room)?.encryption_settings().map(|settings| {
            settings
                .rotation_period_ms
                .map(|millis| Duration::from_millis(u64::from(millis)))
                .unwrap_or(DEFAULT_ROTATION_PERIOD)
        }))
    }

    async fn known_members(&self, room: &RoomId) -> Result<Vec<UserId>, CryptoError> {
        let members = joined_room(self, room)?
            .members_no_sync(RoomMemberships::JOIN)
            .await
            .map_err(fatal)?;
        Ok(members
            .iter()
            .map(|member| UserId::new(member.user_id().as_str()))
            .collect())
    }

    async fn track_members(&self, room: &RoomId, members: &[UserId]) -> Result<(), CryptoError> {
        joined_room(self, room)?.sync_members().await.map_err(fatal)?;
        for member in members {
            let user_id = OwnedUserId::try_from(member.as_str()).map_err(fatal)?;
            let devices = self
                .encryption()
                .get_user_devices(&user_id)
                .await
                .map_err(fatal)?;
            debug!(room = %room, user = %member, devices = devices.devices().count(), "member devices known");
        }
        Ok(())
    }

    async fn rotate_room_key(&self, room: &RoomId) -> Result<(), CryptoError> {
        joined_room(self, room)?
            .discard_room_key()
            .await
            .map_err(fatal)
    }

    async fn decrypt(&self, room: &RoomId, event: &Value) -> Result<Value, CryptoError> {
        let raw = serde_json::value::to_raw_value(event)
            .map(Raw::<OriginalSyncRoomEncryptedEvent>::from_json)
            .map_err(fatal)?;
        let decrypted = joined_room(self, room)?
            .decrypt_event(&raw)
            .await
            .map_err(|err| match err {
                matrix_sdk::Error::MegolmError(ref megolm)
                    if matches!(**megolm, MegolmError::MissingRoomKey(..)) =>
                {
                    CryptoError::Session {
                        room: room.clone(),
                        fault: SessionFault::Missing,
                    }
                }
                other => fatal(other),
            })?;
        serde_json::from_str(decrypted.raw().json().get()).map_err(fatal)
    }
}

#[derive(Debug, Clone)]
struct SharedSession {
    members: BTreeSet<UserId>,
    established_at: Instant,
}

/// Which member set each room's group session was last established for.
#[derive(Debug, Default)]
pub(crate) struct SessionLedger {
    rooms: HashMap<RoomId, SharedSession>,
}

impl SessionLedger {
    pub(crate) fn check(
        &self,
        room: &RoomId,
        members: &[UserId],
        rotation_period: Duration,
        now: Instant,
    ) -> Result<(), SessionFault> {
        let session = self.rooms.get(room).ok_or(SessionFault::Missing)?;
        if now.saturating_duration_since(session.established_at) >= rotation_period {
            return Err(SessionFault::Expired);
        }
        if members.iter().cloned().collect::<BTreeSet<_>>() != session.members {
            return Err(SessionFault::NotShared);
        }
        Ok(())
    }

    pub(crate) fn record(&mut self, room: &RoomId, members: &[UserId], now: Instant) {
        self.rooms.insert(
            room.clone(),
            SharedSession {
                members: members.iter().cloned().collect(),
                established_at: now,
            },
        );
    }
}

/// [`GroupCrypto`] on top of the client's own Megolm machinery.
///
/// A room's session counts as usable once it has been established for the
/// room's current members and has not outlived the room's rotation period.
/// Establishing loads the members and their devices and rotates the room
/// key, so the next send shares a fresh session with exactly those devices.
pub struct MatrixGroupCrypto {
    backend: Arc<dyn RoomEncryption>,
    ledger: Mutex<SessionLedger>,
}

impl MatrixGroupCrypto {
    pub fn new(backend: Arc<dyn RoomEncryption>) -> Self {
        Self {
            backend,
            ledger: Mutex::new(SessionLedger::default()),
        }
    }
}

#[async_trait]
impl GroupCrypto for MatrixGroupCrypto {
    async fn encrypt_group_message(
        &self,
        room: &RoomId,
        body: &str,
    ) -> Result<GroupPayload, CryptoError> {
        let session_fault = |fault| CryptoError::Session {
            room: room.clone(),
            fault,
        };
        let rotation_period = self
            .backend
            .rotation_period(room)
            .await?
            .ok_or_else(|| session_fault(SessionFault::Missing))?;
        let members = self.backend.known_members(room).await?;
        self.ledger
            .lock()
            .await
            .check(room, &members, rotation_period, Instant::now())
            .map_err(session_fault)?;
        Ok(GroupPayload(json!({ "msgtype": "m.text", "body": body })))
    }

    async fn establish_group_session(
        &self,
        room: &RoomId,
        members: &[UserId],
    ) -> Result<(), CryptoError> {
        self.backend.track_members(room, members).await?;
        self.backend.rotate_room_key(room).await?;
        self.ledger
            .lock()
            .await
            .record(room, members, Instant::now());
        info!(room = %room, members = members.len(), "group session established");
        Ok(())
    }

    async fn decrypt_group_message(
        &self,
        room: &RoomId,
        ciphertext: &Ciphertext,
    ) -> Result<DecryptedMessage, CryptoError> {
        let event = if event_type(&ciphertext.content) == Some(EVENT_TYPE_ENCRYPTED) {
            self.backend.decrypt(room, &ciphertext.content).await?
        } else {
            ciphertext.content.clone()
        };
        decrypted_message(room, &event)
    }
}

fn event_type(event: &Value) -> Option<&str> {
    event.get("type").and_then(Value::as_str)
}

fn decrypted_message(room: &RoomId, event: &Value) -> Result<DecryptedMessage, CryptoError> {
    if event_type(event) == Some(EVENT_TYPE_ENCRYPTED) {
        return Err(CryptoError::Session {
            room: room.clone(),
            fault: SessionFault::Missing,
        });
    }
    let sender = event
        .get("sender")
        .and_then(Value::as_str)
        .ok_or_else(|| CryptoError::Fatal("decrypted event has no sender".into()))?;
    let body = event
        .pointer("/content/body")
        .and_then(Value::as_str)
        .ok_or_else(|| CryptoError::Fatal("decrypted event has no text body".into()))?;
    Ok(DecryptedMessage {
        sender: UserId::from(sender),
        body: body.to_string(),
    })
}

#[cfg(test)]
#[path = "tests/crypto_tests.rs"]
mod tests;
