use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use shared::{domain::UserId, error::TransportError};

const SESSION_FILE: &str = "session.json";

/// Credentials of the device whose keys live in the crypto store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSession {
    pub user_id: UserId,
    pub device_id: String,
    pub access_token: String,
}

/// Directory holding the saved session next to the SDK's SQLite stores.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    pub async fn load(&self) -> Result<Option<SavedSession>, TransportError> {
        let raw = match tokio::fs::read(self.file()).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error("read", &err)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| TransportError::MalformedResponse {
                operation: "load_session",
                message: format!("{}: {err}", self.file().display()),
            })
    }

    pub async fn save(&self, session: &SavedSession) -> Result<(), TransportError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| self.io_error("create", &err))?;
        let raw = serde_json::to_vec_pretty(session).map_err(|err| {
            TransportError::Unavailable(format!("failed to encode session: {err}"))
        })?;
        tokio::fs::write(self.file(), raw)
            .await
            .map_err(|err| self.io_error("write", &err))
    }

    /// Removes the session together with the stores of its device.
    pub async fn clear(&self) -> Result<(), TransportError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error("remove", &err)),
        }
    }

    fn io_error(&self, action: &str, err: &std::io::Error) -> TransportError {
        TransportError::Unavailable(format!(
            "failed to {action} session store {}: {err}",
            self.dir.display()
        ))
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
