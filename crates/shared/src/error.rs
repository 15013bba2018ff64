use std::fmt;

use thiserror::Error;

use crate::domain::RoomId;

/// Failure of the messaging transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{operation}: request failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
    #[error("{operation}: rejected with status {status} ({errcode}): {message}")]
    Rejected {
        operation: &'static str,
        status: u16,
        errcode: String,
        message: String,
    },
    #[error("{operation}: malformed response: {message}")]
    MalformedResponse {
        operation: &'static str,
        message: String,
    },
    #[error("{operation}: not logged in")]
    NotLoggedIn { operation: &'static str },
    #[error("{operation}: room {room} is not known to the client")]
    UnknownRoom {
        operation: &'static str,
        room: RoomId,
    },
    #[error("{0}")]
    Unavailable(String),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Rejected {
                status, errcode, ..
            } => *status == 404 || errcode == "M_NOT_FOUND",
            _ => false,
        }
    }
}

/// Why the active group session could not be used for encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionFault {
    Missing,
    Expired,
    NotShared,
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Missing => "missing",
            Self::Expired => "expired",
            Self::NotShared => "not shared with current members",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Retryable once by (re-)establishing the group session.
    #[error("group session for room {room} is {fault}")]
    Session { room: RoomId, fault: SessionFault },
    #[error("crypto failure: {0}")]
    Fatal(String),
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
