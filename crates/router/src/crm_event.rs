//! Typed view of CRM webhook payloads.
//!
//! The CRM posts every account event to one endpoint; only two event
//! names matter here and everything else is acknowledged and dropped.
//! Fields are optional throughout because payload shape varies by event.

use {
    chrono::{DateTime, Utc},
    serde::Deserialize,
    serde_json::{Map, Value},
};

pub const EVENT_MESSAGE_CREATED: &str = "message_created";
pub const EVENT_CONVERSATION_STATUS_CHANGED: &str = "conversation_status_changed";

#[derive(Debug, Clone, Deserialize)]
pub struct CrmEvent {
    pub event: String,
    #[serde(default)]
    pub message: Option<CrmEventMessage>,
    #[serde(default)]
    pub conversation: Option<CrmEventConversation>,
    #[serde(default)]
    pub sender: Option<CrmEventSender>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrmEventMessage {
    pub id: i64,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: String,
    #[serde(default, rename = "private")]
    pub is_private: bool,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrmEventConversation {
    pub id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub custom_attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrmEventSender {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl CrmEvent {
    /// Session id the conversation was tagged with at creation time.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.conversation
            .as_ref()?
            .custom_attributes
            .get("session_id")?
            .as_str()
    }

    /// True for a public outgoing message authored by someone other than
    /// the visitor, i.e. a human agent reply worth relaying.
    #[must_use]
    pub fn is_manual_agent_reply(&self) -> bool {
        let Some(message) = &self.message else {
            return false;
        };
        let sender_is_contact = self
            .sender
            .as_ref()
            .and_then(|s| s.kind.as_deref())
            .is_some_and(|kind| kind == "contact");
        self.event == EVENT_MESSAGE_CREATED
            && message.message_type == "outgoing"
            && !message.is_private
            && !sender_is_contact
    }

    /// Message creation time as RFC 3339, when the payload carries one.
    #[must_use]
    pub fn message_timestamp(&self) -> Option<String> {
        let seconds = self.message.as_ref()?.created_at?;
        DateTime::<Utc>::from_timestamp(seconds, 0).map(|t| t.to_rfc3339())
    }
}
