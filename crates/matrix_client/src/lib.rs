use std::path::Path;

use async_trait::async_trait;
use bot_core::MessagingTransport;
use matrix_sdk::{
    authentication::matrix::MatrixSession,
    ruma::{
        api::client::state::get_state_events_for_key,
        events::{room::message::RoomMessageEventContent, StateEventType},
        OwnedRoomId, OwnedUserId,
    },
    Client, Room, RoomMemberships, SessionMeta, SessionTokens,
};
use serde_json::Value;
use shared::{
    domain::{EventId, RoomId, UserId},
    error::TransportError,
    protocol::{GroupPayload, EVENT_TYPE_MESSAGE},
};
use tracing::{info, warn};

pub mod crypto;
pub mod session;
pub mod sync;

pub use crypto::{MatrixGroupCrypto, RoomEncryption};
pub use session::{SavedSession, SessionStore};
pub use sync::{initial_sync, spawn_sync};

/// Identity of the signed-in device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub device_id: String,
}

/// Builds a client whose room state and crypto store live in SQLite
/// databases under `store_dir`.
pub async fn connect(homeserver: &str, store_dir: &Path) -> Result<Client, TransportError> {
    Client::builder()
        .homeserver_url(homeserver.trim())
        .sqlite_store(store_dir, None)
        .build()
        .await
        .map_err(|err| {
            TransportError::Unavailable(format!(
                "failed to build client for {homeserver}: {err}"
            ))
        })
}

/// Restores the device saved in `sessions`, or logs in with the password and
/// saves the new device. The crypto store only matches the device it was
/// created for, so a restart must keep using the same one.
pub async fn sign_in(
    client: &Client,
    sessions: &SessionStore,
    username: &str,
    password: &str,
    device_name: &str,
) -> Result<Session, TransportError> {
    if let Some(saved) = sessions.load().await? {
        let session = restore(client, saved).await?;
        info!(user_id = %session.user_id, device_id = %session.device_id, "session restored");
        return Ok(session);
    }

    let response = client
        .matrix_auth()
        .login_username(username, password)
        .initial_device_display_name(device_name)
        .send()
        .await
        .map_err(|err| sdk_error("login", err))?;
    let saved = SavedSession {
        user_id: UserId::new(response.user_id.as_str()),
        device_id: response.device_id.to_string(),
        access_token: response.access_token,
    };
    sessions.save(&saved).await?;
    info!(user_id = %saved.user_id, device_id = %saved.device_id, "login successful");
    Ok(Session {
        user_id: saved.user_id,
        device_id: saved.device_id,
    })
}

async fn restore(client: &Client, saved: SavedSession) -> Result<Session, TransportError> {
    let operation = "restore_session";
    let user_id =
        OwnedUserId::try_from(saved.user_id.as_str()).map_err(|err| TransportError::Request {
            operation,
            message: format!("stored user id {} is invalid: {err}", saved.user_id),
        })?;
    client
        .restore_session(MatrixSession {
            meta: SessionMeta {
                user_id,
                device_id: saved.device_id.as_str().into(),
            },
            tokens: SessionTokens {
                access_token: saved.access_token,
                refresh_token: None,
            },
        })
        .await
        .map_err(|err| sdk_error(operation, err))?;
    Ok(Session {
        user_id: saved.user_id,
        device_id: saved.device_id,
    })
}

/// Maps SDK failures; homeserver rejections keep their status and errcode.
pub(crate) fn sdk_error(
    operation: &'static str,
    err: impl Into<matrix_sdk::Error>,
) -> TransportError {
    let err = err.into();
    match (err.as_client_api_error(), err.client_api_error_kind()) {
        (Some(api), kind) => TransportError::Rejected {
            operation,
            status: api.status_code.as_u16(),
            errcode: kind.map(|kind| kind.errcode().to_string()).unwrap_or_default(),
            message: api.to_string(),
        },
        (None, _) => TransportError::Request {
            operation,
            message: err.to_string(),
        },
    }
}

pub(crate) fn ruma_room_id(
    operation: &'static str,
    room: &RoomId,
) -> Result<OwnedRoomId, TransportError> {
    OwnedRoomId::try_from(room.as_str()).map_err(|err| TransportError::Request {
        operation,
        message: format!("invalid room id {room}: {err}"),
    })
}

fn display_name_or_localpart(name: Option<String>, user_id: &UserId) -> String {
    name.filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| user_id.localpart().to_string())
}

/// [`MessagingTransport`] over a signed-in SDK client.
///
/// Room lookups go through the client's synced room list, so a room the
/// bot has never synced is reported as [`TransportError::UnknownRoom`].
#[derive(Clone)]
pub struct MatrixTransport {
    client: Client,
    sessions: SessionStore,
}

impl MatrixTransport {
    pub fn new(client: Client, sessions: SessionStore) -> Self {
        Self { client, sessions }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.client.user_id().map(|id| UserId::new(id.as_str()))
    }

    /// Profile display name, or the user id localpart when none is set.
    pub async fn own_display_name(&self) -> Result<String, TransportError> {
        let operation = "own_display_name";
        let user_id = self
            .user_id()
            .ok_or(TransportError::NotLoggedIn { operation })?;
        let name = self
            .client
            .account()
            .get_display_name()
            .await
            .map_err(|err| sdk_error(operation, err))?;
        Ok(display_name_or_localpart(name, &user_id))
    }

    fn room(&self, operation: &'static str, room: &RoomId) -> Result<Room, TransportError> {
        let room_id = ruma_room_id(operation, room)?;
        self.client
            .get_room(&room_id)
            .ok_or_else(|| TransportError::UnknownRoom {
                operation,
                room: room.clone(),
            })
    }
}

#[async_trait]
impl MessagingTransport for MatrixTransport {
    async fn send_text(&self, room: &RoomId, body: &str) -> Result<EventId, TransportError> {
        let operation = "send_text";
        let response = self
            .room(operation, room)?
            .send(RoomMessageEventContent::text_plain(body))
            .await
            .map_err(|err| sdk_error(operation, err))?;
        Ok(EventId::new(response.event_id.as_str()))
    }

    async fn send_encrypted(
        &self,
        room: &RoomId,
        payload: &GroupPayload,
    ) -> Result<EventId, TransportError> {
        let operation = "send_encrypted";
        let target = self.room(operation, room)?;
        // The SDK only seals events for rooms it knows to be encrypted.
        if target.encryption_settings().is_none() {
            return Err(TransportError::Unavailable(format!(
                "{operation}: client has no encryption state for room {room}"
            )));
        }
        let response = target
            .send_raw(EVENT_TYPE_MESSAGE, payload.0.clone())
            .await
            .map_err(|err| sdk_error(operation, err))?;
        Ok(EventId::new(response.event_id.as_str()))
    }

    async fn join_room(&self, room: &RoomId) -> Result<(), TransportError> {
        let operation = "join_room";
        let room_id = ruma_room_id(operation, room)?;
        self.client
            .join_room_by_id(&room_id)
            .await
            .map_err(|err| sdk_error(operation, err))?;
        Ok(())
    }

    async fn leave_room(&self, room: &RoomId) -> Result<(), TransportError> {
        let operation = "leave_room";
        self.room(operation, room)?
            .leave()
            .await
            .map_err(|err| sdk_error(operation, err))
    }

    /// Deletes the device on the homeserver, then the saved session and
    /// stores that belonged to it.
    async fn logout(&self) -> Result<(), TransportError> {
        self.client
            .matrix_auth()
            .logout()
            .await
            .map_err(|err| sdk_error("logout", err))?;
        if let Err(err) = self.sessions.clear().await {
            warn!(%err, "logged out but failed to remove the local session store");
        }
        Ok(())
    }

    async fn joined_rooms(&self) -> Result<Vec<RoomId>, TransportError> {
        Ok(self
            .client
            .joined_rooms()
            .iter()
            .map(|room| RoomId::new(room.room_id().as_str()))
            .collect())
    }

    async fn joined_members(&self, room: &RoomId) -> Result<Vec<UserId>, TransportError> {
        let operation = "joined_members";
        let members = self
            .room(operation, room)?
            .members(RoomMemberships::JOIN)
            .await
            .map_err(|err| sdk_error(operation, err))?;
        Ok(members
            .iter()
            .map(|member| UserId::new(member.user_id().as_str()))
            .collect())
    }

    /// Asks the homeserver directly instead of the synced store, so a state
    /// change is visible before the next sync delivers it.
    async fn room_state(
        &self,
        room: &RoomId,
        event_type: &str,
        state_key: &str,
    ) -> Result<Value, TransportError> {
        let operation = "room_state";
        let request = get_state_events_for_key::v3::Request::new(
            ruma_room_id(operation, room)?,
            StateEventType::from(event_type),
            state_key.to_owned(),
        );
        let response = self
            .client
            .send(request)
            .await
            .map_err(|err| sdk_error(operation, err))?;
        serde_json::from_str(response.content.json().get()).map_err(|err| {
            TransportError::MalformedResponse {
                operation,
                message: err.to_string(),
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
