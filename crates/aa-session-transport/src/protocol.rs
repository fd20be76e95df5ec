//! Wire protocol for client-server communication.

use aa_session::OrchestratorError;
use aa_session_core::{SessionSnapshot, Step};
use serde::{Deserialize, Serialize};

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start the interactive login.
    Login,
    /// End the session.
    Logout,
    /// Re-read the balance.
    Refresh,
    /// Request the current snapshot.
    GetSnapshot,
    /// Ping for keepalive.
    Ping,
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session snapshot, pushed on every change and in reply to requests.
    Snapshot { snapshot: SessionSnapshot },
    /// Another operation is in flight; nothing was started.
    Busy,
    /// Request failed.
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<Step>,
        retryable: bool,
    },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    #[must_use]
    pub const fn snapshot(snapshot: SessionSnapshot) -> Self {
        Self::Snapshot { snapshot }
    }

    /// Error for a message the server could not parse.
    #[must_use]
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::Error {
            code: "invalid_message".to_string(),
            message: message.into(),
            step: None,
            retryable: false,
        }
    }
}

impl From<&OrchestratorError> for ServerMessage {
    fn from(err: &OrchestratorError) -> Self {
        match err {
            OrchestratorError::Busy => Self::Busy,
            other => Self::Error {
                code: other.code().to_string(),
                message: other.to_string(),
                step: match other {
                    OrchestratorError::Failed(session_err) => Some(session_err.step),
                    _ => None,
                },
                retryable: other.is_retryable(),
            },
        }
    }
}

impl From<Result<SessionSnapshot, OrchestratorError>> for ServerMessage {
    fn from(result: Result<SessionSnapshot, OrchestratorError>) -> Self {
        match result {
            Ok(snapshot) => Self::snapshot(snapshot),
            Err(err) => Self::from(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use aa_session_core::{SessionError, session::ErrorKind};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_client_messages_parse() {
        let parsed: ClientMessage = serde_json::from_value(json!({ "type": "get_snapshot" })).unwrap();
        assert_eq!(parsed, ClientMessage::GetSnapshot);
        let parsed: ClientMessage = serde_json::from_value(json!({ "type": "login" })).unwrap();
        assert_eq!(parsed, ClientMessage::Login);
        assert!(serde_json::from_value::<ClientMessage>(json!({ "type": "deploy" })).is_err());
    }

    #[test]
    fn test_busy_maps_to_busy() {
        assert_eq!(
            ServerMessage::from(&OrchestratorError::Busy),
            ServerMessage::Busy
        );
    }

    #[test]
    fn test_failure_carries_step() {
        let err = OrchestratorError::Failed(SessionError::new(
            Step::Resolve,
            ErrorKind::NetworkUnreachable,
            "bundler timeout",
        ));
        let json = serde_json::to_value(ServerMessage::from(&err)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "failed");
        assert_eq!(json["step"], "resolve");
        assert_eq!(json["retryable"], true);
    }

    #[test]
    fn test_snapshot_reply_shape() {
        let json =
            serde_json::to_value(ServerMessage::snapshot(SessionSnapshot::unauthenticated()))
                .unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["snapshot"]["status"], "unauthenticated");
        assert!(json["snapshot"]["lastError"].is_null());
    }
}
