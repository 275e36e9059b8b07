use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use parlor_common::now_ms;

/// One visitor conversation. Serialized as a flat JSON object; field names
/// match the persisted blob (camelCase).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    /// CRM contact id. Empty until the first successful upsert, then fixed
    /// for the lifetime of the session.
    #[serde(default)]
    pub contact_id: String,
    pub started_at: u64,
    pub last_message_at: u64,
    #[serde(default)]
    pub message_count: u32,
    /// Open key/value bag: origin page, user agent, captured contact
    /// fields, correlation ids. Merged key-by-key on every write.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Partial update applied to a session on write. `count_message` must be
/// set on exactly the one write that represents a new inbound message.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub contact_id: Option<String>,
    pub metadata: Map<String, Value>,
    pub count_message: bool,
}

impl SessionPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contact_id(mut self, contact_id: impl Into<String>) -> Self {
        self.contact_id = Some(contact_id.into());
        self
    }

    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn merge_metadata(mut self, metadata: &Map<String, Value>) -> Self {
        for (k, v) in metadata {
            self.metadata.insert(k.clone(), v.clone());
        }
        self
    }

    #[must_use]
    pub fn counted(mut self) -> Self {
        self.count_message = true;
        self
    }
}

impl Session {
    /// A fresh session seeded at the current time.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            session_id: session_id.into(),
            contact_id: String::new(),
            started_at: now,
            last_message_at: now,
            message_count: 0,
            metadata: Map::new(),
        }
    }

    /// Merge a patch into this session. The contact id is write-once; the
    /// metadata bag is merged key-by-key, never replaced wholesale.
    pub fn apply(&mut self, patch: SessionPatch) {
        if self.contact_id.is_empty()
            && let Some(contact_id) = patch.contact_id
        {
            self.contact_id = contact_id;
        }
        for (k, v) in patch.metadata {
            self.metadata.insert(k, v);
        }
        if patch.count_message {
            self.message_count += 1;
        }
        self.last_message_at = now_ms();
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// The open CRM conversation id, if one has been bound. Stored in the
    /// metadata bag as a string for blob compatibility.
    #[must_use]
    pub fn conversation_id(&self) -> Option<i64> {
        match self.metadata.get("conversationId") {
            Some(Value::String(s)) => s.parse().ok(),
            Some(Value::Number(n)) => n.as_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.meta_str("email")
    }

    #[must_use]
    pub fn phone(&self) -> Option<&str> {
        self.meta_str("phone")
    }

    #[must_use]
    pub fn page_url(&self) -> Option<&str> {
        self.meta_str("pageUrl")
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.meta_str("userAgent")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn counted_patch_increments_once() {
        let mut session = Session::new("s1");
        session.apply(SessionPatch::new().counted());
        session.apply(SessionPatch::new().counted());
        session.apply(SessionPatch::new());
        assert_eq!(session.message_count, 2);
    }

    #[test]
    fn contact_id_is_write_once() {
        let mut session = Session::new("s1");
        session.apply(SessionPatch::new().contact_id("42"));
        session.apply(SessionPatch::new().contact_id("99"));
        assert_eq!(session.contact_id, "42");
    }

    #[test]
    fn metadata_merges_key_by_key() {
        let mut session = Session::new("s1");
        session.apply(SessionPatch::new().meta("pageUrl", "/pricing").meta("email", "a@b.co"));
        session.apply(SessionPatch::new().meta("pageUrl", "/docs"));
        assert_eq!(session.page_url(), Some("/docs"));
        assert_eq!(session.email(), Some("a@b.co"));
    }

    #[test]
    fn conversation_id_reads_string_or_number() {
        let mut session = Session::new("s1");
        assert_eq!(session.conversation_id(), None);
        session.apply(SessionPatch::new().meta("conversationId", "128"));
        assert_eq!(session.conversation_id(), Some(128));
        session.metadata.insert("conversationId".into(), json!(256));
        assert_eq!(session.conversation_id(), Some(256));
    }

    #[test]
    fn blob_round_trip_is_camel_case() {
        let session = Session::new("s1");
        let blob = serde_json::to_value(&session).unwrap();
        assert!(blob.get("sessionId").is_some());
        assert!(blob.get("messageCount").is_some());
        let back: Session = serde_json::from_value(blob).unwrap();
        assert_eq!(back.session_id, "s1");
    }
}
