use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// Attachment media kind, mirrored in adapter payloads as `file_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Audio,
    Video,
    File,
}

/// A file attached to an inbound message. The URL must be reachable by the
/// downstream pipeline, so relative paths are resolved against the public
/// URL before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// One visitor message entering the router. Ephemeral: the router never
/// persists it, the CRM adapter owns transcript storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub session_id: String,
    #[serde(alias = "message")]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Provenance of an agent reply, recorded in the CRM replay so automated
/// replies can be told apart from manual ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    AiAgent,
    ManualAgent,
}

/// An asynchronous agent reply addressed to a session. Arrives out of band
/// with no affinity to the connection that sent the originating message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReply {
    pub session_id: String,
    #[serde(alias = "response")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl InboundMessage {
    /// Metadata lookup as a string, for the handful of keys the router reads.
    #[must_use]
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Visitor display name assembled from captured contact fields.
    #[must_use]
    pub fn sender_name(&self) -> String {
        match (self.meta_str("firstName"), self.meta_str("lastName")) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(single), None) | (None, Some(single)) => single.to_string(),
            (None, None) => "Website Visitor".to_string(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn inbound_accepts_message_alias() {
        let msg: InboundMessage =
            serde_json::from_value(json!({"sessionId": "s1", "message": "hello"})).unwrap();
        assert_eq!(msg.text, "hello");
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn reply_accepts_response_alias() {
        let reply: AgentReply =
            serde_json::from_value(json!({"sessionId": "s1", "response": "hi there"})).unwrap();
        assert_eq!(reply.text, "hi there");
    }

    #[test]
    fn sender_name_falls_back() {
        let msg: InboundMessage =
            serde_json::from_value(json!({"sessionId": "s1", "text": "x"})).unwrap();
        assert_eq!(msg.sender_name(), "Website Visitor");

        let msg: InboundMessage = serde_json::from_value(
            json!({"sessionId": "s1", "text": "x", "metadata": {"firstName": "Ada", "lastName": "Lovelace"}}),
        )
        .unwrap();
        assert_eq!(msg.sender_name(), "Ada Lovelace");
    }

    #[test]
    fn attachment_kind_round_trips() {
        let att: Attachment =
            serde_json::from_value(json!({"type": "image", "url": "/uploads/a.png"})).unwrap();
        assert_eq!(att.kind, AttachmentKind::Image);
        let back = serde_json::to_value(&att).unwrap();
        assert_eq!(back["type"], "image");
    }
}
