use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use {
    crate::Result,
    parlor_common::{Attachment, InboundMessage},
};

/// Direction of a CRM conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    /// From the visitor into the conversation.
    Incoming,
    /// From an agent (automated or human) towards the visitor.
    Outgoing,
}

/// Everything an adapter may need to correlate a dispatch with a session:
/// the durable session id plus whatever real CRM identifiers have been
/// bound so far. Adapters that need numeric ids fall back to hash-derived
/// ones when the real ids are still unset.
#[derive(Debug, Clone, Default)]
pub struct SessionBinding {
    pub session_id: String,
    /// CRM contact id as stored on the session (string form).
    pub contact_id: Option<String>,
    /// Open CRM conversation id, once bound.
    pub conversation_id: Option<i64>,
    pub sender_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Pass-through message metadata (page URL, user agent, ...).
    pub metadata: Map<String, Value>,
}

impl SessionBinding {
    /// Build a binding from an inbound message and the ids known so far.
    #[must_use]
    pub fn from_message(
        message: &InboundMessage,
        contact_id: Option<String>,
        conversation_id: Option<i64>,
    ) -> Self {
        Self {
            session_id: message.session_id.clone(),
            contact_id: contact_id.filter(|id| !id.is_empty()),
            conversation_id,
            sender_name: message.sender_name(),
            email: message.meta_str("email").map(str::to_string),
            phone: message.meta_str("phone").map(str::to_string),
            metadata: message.metadata.clone(),
        }
    }
}

/// Profile fields captured from the widget, used when establishing a CRM
/// contact.
#[derive(Debug, Clone, Default)]
pub struct ContactProfile {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub user_agent: Option<String>,
    pub page_url: Option<String>,
}

impl ContactProfile {
    #[must_use]
    pub fn from_message(message: &InboundMessage) -> Self {
        Self {
            name: message.sender_name(),
            email: message.meta_str("email").map(str::to_string),
            phone: message.meta_str("phone").map(str::to_string),
            user_agent: message.meta_str("userAgent").map(str::to_string),
            page_url: message.meta_str("pageUrl").map(str::to_string),
        }
    }
}

/// Resolved CRM identifiers for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrmBinding {
    pub contact_id: i64,
    pub conversation_id: i64,
}

/// Common capability set of every downstream integration.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Adapter identifier for logs and the health surface.
    fn name(&self) -> &'static str;

    /// Whether the adapter has the configuration it needs. Disabled
    /// adapters are skipped, not queued.
    fn is_enabled(&self) -> bool;

    /// Forward one inbound visitor message. Returns an adapter-issued
    /// message id when the integration produces one.
    async fn send_inbound(
        &self,
        binding: &SessionBinding,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<Option<String>>;

    async fn health_check(&self) -> bool;
}

/// Extra capabilities of the CRM integration: it owns the contact and
/// conversation records every other adapter correlates against.
#[async_trait]
pub trait CrmChannel: ChannelAdapter {
    /// Resolve (or create) the contact and open conversation for a session.
    async fn ensure_binding(
        &self,
        session_id: &str,
        profile: &ContactProfile,
    ) -> Result<CrmBinding>;

    /// Replay an agent reply into the CRM conversation so the transcript
    /// stays complete.
    async fn replay_reply(
        &self,
        conversation_id: i64,
        text: &str,
        content_attributes: Value,
    ) -> Result<()>;
}
