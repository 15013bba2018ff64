use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use serde_json::{json, Value};
use shared::{
    domain::{EventId, RoomId, UserId},
    error::{CryptoError, SessionFault, TransportError},
    protocol::{Ciphertext, DecryptedMessage, GroupPayload},
};
use tokio::sync::{broadcast, Mutex};

use crate::{BotEvent, GroupCrypto, MessagingTransport};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransportCall {
    SendText { room: RoomId, body: String },
    SendEncrypted { room: RoomId, payload: GroupPayload },
    Join(RoomId),
    Leave(RoomId),
    Logout,
    JoinedRooms,
    JoinedMembers(RoomId),
    RoomState { room: RoomId, event_type: String },
}

pub(crate) struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    encrypted_rooms: Mutex<HashSet<RoomId>>,
    state_contents: HashMap<RoomId, Value>,
    joined_rooms: Vec<RoomId>,
    members: Vec<UserId>,
    failing_operations: HashSet<&'static str>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            encrypted_rooms: Mutex::new(HashSet::new()),
            state_contents: HashMap::new(),
            joined_rooms: Vec::new(),
            members: vec![UserId::from("@bot:example.org"), UserId::from("@alice:example.org")],
            failing_operations: HashSet::new(),
        }
    }

    pub(crate) fn with_encrypted_room(mut self, room: &str) -> Self {
        self.encrypted_rooms.get_mut().insert(RoomId::from(room));
        self
    }

    /// Serves `content` verbatim as the room's encryption state.
    pub(crate) fn with_state_content(mut self, room: &str, content: Value) -> Self {
        self.state_contents.insert(RoomId::from(room), content);
        self
    }

    pub(crate) fn with_joined_rooms(mut self, rooms: &[&str]) -> Self {
        self.joined_rooms = rooms.iter().map(|room| RoomId::from(*room)).collect();
        self
    }

    pub(crate) fn with_members(mut self, members: &[&str]) -> Self {
        self.members = members.iter().map(|member| UserId::from(*member)).collect();
        self
    }

    /// Makes the named trait operation return a transport error.
    pub(crate) fn failing(mut self, operation: &'static str) -> Self {
        self.failing_operations.insert(operation);
        self
    }

    pub(crate) async fn set_encrypted(&self, room: &str, encrypted: bool) {
        let mut rooms = self.encrypted_rooms.lock().await;
        if encrypted {
            rooms.insert(RoomId::from(room));
        } else {
            rooms.remove(&RoomId::from(room));
        }
    }

    pub(crate) async fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().await.clone()
    }

    /// Calls that change something on the homeserver; lookups are excluded.
    pub(crate) async fn side_effects(&self) -> Vec<TransportCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|call| {
                !matches!(
                    call,
                    TransportCall::JoinedRooms
                        | TransportCall::JoinedMembers(_)
                        | TransportCall::RoomState { .. }
                )
            })
            .collect()
    }

    async fn record(&self, call: TransportCall, operation: &'static str) -> Result<(), TransportError> {
        self.calls.lock().await.push(call);
        if self.failing_operations.contains(operation) {
            return Err(TransportError::Request {
                operation,
                message: "connection reset".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingTransport for RecordingTransport {
    async fn send_text(&self, room: &RoomId, body: &str) -> Result<EventId, TransportError> {
        self.record(
            TransportCall::SendText {
                room: room.clone(),
                body: body.to_string(),
            },
            "send_text",
        )
        .await?;
        Ok(EventId::from("$plain"))
    }

    async fn send_encrypted(
        &self,
        room: &RoomId,
        payload: &GroupPayload,
    ) -> Result<EventId, TransportError> {
        self.record(
            TransportCall::SendEncrypted {
                room: room.clone(),
                payload: payload.clone(),
            },
            "send_encrypted",
        )
        .await?;
        Ok(EventId::from("$encrypted"))
    }

    async fn join_room(&self, room: &RoomId) -> Result<(), TransportError> {
        self.record(TransportCall::Join(room.clone()), "join_room").await
    }

    async fn leave_room(&self, room: &RoomId) -> Result<(), TransportError> {
        self.record(TransportCall::Leave(room.clone()), "leave_room").await
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Logout, "logout").await
    }

    async fn joined_rooms(&self) -> Result<Vec<RoomId>, TransportError> {
        self.record(TransportCall::JoinedRooms, "joined_rooms").await?;
        Ok(self.joined_rooms.clone())
    }

    async fn joined_members(&self, room: &RoomId) -> Result<Vec<UserId>, TransportError> {
        self.record(TransportCall::JoinedMembers(room.clone()), "joined_members")
            .await?;
        Ok(self.members.clone())
    }

    async fn room_state(
        &self,
        room: &RoomId,
        event_type: &str,
        _state_key: &str,
    ) -> Result<Value, TransportError> {
        self.record(
            TransportCall::RoomState {
                room: room.clone(),
                event_type: event_type.to_string(),
            },
            "room_state",
        )
        .await?;
        if let Some(content) = self.state_contents.get(room) {
            return Ok(content.clone());
        }
        if self.encrypted_rooms.lock().await.contains(room) {
            return Ok(json!({ "algorithm": "m.megolm.v1.aes-sha2" }));
        }
        Err(TransportError::Rejected {
            operation: "room_state",
            status: 404,
            errcode: "M_NOT_FOUND".into(),
            message: "Event not found.".into(),
        })
    }
}

pub(crate) fn sample_payload() -> GroupPayload {
    GroupPayload(json!({ "msgtype": "m.text", "body": "sealed on send" }))
}

pub(crate) fn session_fault(room: &str, fault: SessionFault) -> CryptoError {
    CryptoError::Session {
        room: RoomId::from(room),
        fault,
    }
}

pub(crate) struct ScriptedCrypto {
    encrypt_results: Mutex<VecDeque<Result<GroupPayload, CryptoError>>>,
    establish_result: Result<(), CryptoError>,
    decrypt_result: Result<DecryptedMessage, CryptoError>,
    encrypt_calls: Mutex<Vec<(RoomId, String)>>,
    establish_calls: Mutex<Vec<(RoomId, Vec<UserId>)>>,
    decrypt_calls: Mutex<u32>,
}

impl ScriptedCrypto {
    /// Every encryption succeeds with [`sample_payload`] unless scripted.
    pub(crate) fn new() -> Self {
        Self {
            encrypt_results: Mutex::new(VecDeque::new()),
            establish_result: Ok(()),
            decrypt_result: Err(CryptoError::Fatal("no decrypt scripted".into())),
            encrypt_calls: Mutex::new(Vec::new()),
            establish_calls: Mutex::new(Vec::new()),
            decrypt_calls: Mutex::new(0),
        }
    }

    pub(crate) fn with_encrypt_results(
        mut self,
        results: Vec<Result<GroupPayload, CryptoError>>,
    ) -> Self {
        *self.encrypt_results.get_mut() = results.into();
        self
    }

    pub(crate) fn with_establish_result(mut self, result: Result<(), CryptoError>) -> Self {
        self.establish_result = result;
        self
    }

    pub(crate) fn decrypting_to(mut self, sender: &str, body: &str) -> Self {
        self.decrypt_result = Ok(DecryptedMessage {
            sender: UserId::from(sender),
            body: body.to_string(),
        });
        self
    }

    pub(crate) fn failing_decrypt(mut self, error: CryptoError) -> Self {
        self.decrypt_result = Err(error);
        self
    }

    pub(crate) async fn encrypt_calls(&self) -> Vec<(RoomId, String)> {
        self.encrypt_calls.lock().await.clone()
    }

    pub(crate) async fn establish_calls(&self) -> Vec<(RoomId, Vec<UserId>)> {
        self.establish_calls.lock().await.clone()
    }

    pub(crate) async fn decrypt_calls(&self) -> u32 {
        *self.decrypt_calls.lock().await
    }
}

#[async_trait]
impl GroupCrypto for ScriptedCrypto {
    async fn encrypt_group_message(
        &self,
        room: &RoomId,
        body: &str,
    ) -> Result<GroupPayload, CryptoError> {
        self.encrypt_calls
            .lock()
            .await
            .push((room.clone(), body.to_string()));
        self.encrypt_results
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(sample_payload()))
    }

    async fn establish_group_session(
        &self,
        room: &RoomId,
        members: &[UserId],
    ) -> Result<(), CryptoError> {
        self.establish_calls
            .lock()
            .await
            .push((room.clone(), members.to_vec()));
        self.establish_result.clone()
    }

    async fn decrypt_group_message(
        &self,
        _room: &RoomId,
        _ciphertext: &Ciphertext,
    ) -> Result<DecryptedMessage, CryptoError> {
        *self.decrypt_calls.lock().await += 1;
        self.decrypt_result.clone()
    }
}

pub(crate) fn drain_events(rx: &mut broadcast::Receiver<BotEvent>) -> Vec<BotEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
