use crate::progress::ProgressSnapshot;
use serde::{Deserialize, Serialize};

/// Messages a real-time client may send
///
/// A client-side `timestamp` is accepted and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Subscribe { channel: String },
    GetProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerPayload {
    Pong,
    Subscribed { channel: String },
    ProgressUpdate { data: ProgressSnapshot },
    Error { message: String },
}

/// Envelope for everything pushed to clients: `{"type": .., "timestamp": .., ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(flatten)]
    pub payload: ServerPayload,
    pub timestamp: String,
}

impl ServerMessage {
    #[must_use]
    pub fn new(payload: ServerPayload) -> Self {
        Self {
            payload,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[must_use]
    pub fn progress(data: ProgressSnapshot) -> Self {
        Self::new(ServerPayload::ProgressUpdate { data })
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ServerPayload::Error {
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_parse() {
        let ping: ClientMessage =
            serde_json::from_str(r#"{"type":"ping","timestamp":"2026-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);

        let subscribe: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","channel":"downloads"}"#).unwrap();
        assert_eq!(
            subscribe,
            ClientMessage::Subscribe {
                channel: "downloads".to_string()
            }
        );

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"reboot"}"#).is_err());
    }

    #[test]
    fn test_server_message_shape() {
        let json = ServerMessage::new(ServerPayload::Pong).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "pong");
        assert!(value["timestamp"].is_string());

        let json = ServerMessage::progress(ProgressSnapshot::default())
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "progress_update");
        assert!(value["data"]["presets"].is_object());
    }
}
