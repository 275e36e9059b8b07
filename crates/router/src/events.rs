//! Server-to-client event frames.
//!
//! Every frame delivered over a websocket is one JSON object with an
//! `event` name and an optional `payload`. Frames are serialized once and
//! fanned out as text, so a slow consumer never re-serializes.

use {
    serde::Serialize,
    serde_json::{Value, json},
    tracing::error,
};

use parlor_common::now_ms;

#[derive(Debug, Clone, Serialize)]
pub struct EventFrame {
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl EventFrame {
    #[must_use]
    pub fn connection_status(connected: bool) -> Self {
        Self {
            event: "connection-status",
            payload: Some(json!({ "connected": connected, "timestamp": now_ms() })),
        }
    }

    #[must_use]
    pub fn agent_typing() -> Self {
        Self {
            event: "agent-typing",
            payload: None,
        }
    }

    #[must_use]
    pub fn agent_response(text: &str, timestamp: &str, metadata: Value) -> Self {
        Self {
            event: "agent-response",
            payload: Some(json!({
                "message": text,
                "timestamp": timestamp,
                "metadata": metadata,
            })),
        }
    }

    #[must_use]
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            event: "error",
            payload: Some(json!({ "code": code, "message": message })),
        }
    }

    /// Wire form of the frame. Serialization of these shapes cannot fail
    /// in practice; if it ever does we log and emit a bare error frame.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match serde_json::to_string(self) {
            Ok(text) => text,
            Err(e) => {
                error!(event = self.event, error = %e, "frame serialization failed");
                r#"{"event":"error","payload":{"code":"INTERNAL_ERROR","message":"internal error"}}"#
                    .to_string()
            },
        }
    }
}
