//! Chatwoot CRM adapter: contact/conversation bindings and transcript
//! persistence.
//!
//! Contact resolution is search-then-create with no lock on the Chatwoot
//! side, so two racing first messages for a brand-new session can both
//! miss the search and both create a contact. That at-least-once behavior
//! is accepted and documented on [`ChatwootAdapter::get_or_create_contact`];
//! the router treats it as best-effort de-duplication, not a guarantee.

use std::time::Duration;

use {
    async_trait::async_trait,
    reqwest::Client,
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    serde_json::{Map, Value, json},
    tracing::{debug, info, warn},
};

use {
    crate::{
        Error, Result,
        adapter::{
            ChannelAdapter, ContactProfile, CrmBinding, CrmChannel, MessageDirection,
            SessionBinding,
        },
    },
    parlor_common::Attachment,
    parlor_config::ChatwootConfig,
};

const ADAPTER: &str = "chatwoot";

#[derive(Debug, Clone, Deserialize)]
pub struct Contact {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub custom_attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    pub id: i64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: i64,
}

pub struct ChatwootAdapter {
    client: Client,
    base_url: Option<String>,
    api_key: Option<Secret<String>>,
    account_id: String,
    inbox_id: String,
}

impl std::fmt::Debug for ChatwootAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatwootAdapter")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("account_id", &self.account_id)
            .field("inbox_id", &self.inbox_id)
            .finish()
    }
}

impl ChatwootAdapter {
    #[must_use]
    pub fn new(config: &ChatwootConfig) -> Self {
        if !config.is_configured() {
            warn!("chatwoot adapter not enabled: missing CHATWOOT_API_URL or CHATWOOT_API_KEY");
        }
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: config
                .api_url
                .as_ref()
                .map(|u| format!("{}/api/v1", u.trim_end_matches('/'))),
            api_key: config.api_key.clone(),
            account_id: config.account_id.clone(),
            inbox_id: config.inbox_id.clone(),
        }
    }

    /// Numeric inbox id for correlation payloads.
    #[must_use]
    pub fn inbox_id(&self) -> Option<i64> {
        self.inbox_id.parse().ok()
    }

    /// Numeric account id for correlation payloads.
    #[must_use]
    pub fn account_id(&self) -> Option<i64> {
        self.account_id.parse().ok()
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let (base, key) = match (&self.base_url, &self.api_key) {
            (Some(base), Some(key)) => (base, key),
            _ => return Err(Error::disabled(ADAPTER)),
        };
        Ok(self
            .client
            .request(method, format!("{base}/accounts/{}{path}", self.account_id))
            .header("api_access_token", key.expose_secret()))
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .request(reqwest::Method::GET, path)?
            .query(query)
            .send()
            .await?;
        Ok(Error::from_response(ADAPTER, response)
            .await?
            .json()
            .await?)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .request(reqwest::Method::POST, path)?
            .json(body)
            .send()
            .await?;
        Ok(Error::from_response(ADAPTER, response)
            .await?
            .json()
            .await?)
    }

    /// Search for a contact whose identifier or `session_id` custom
    /// attribute matches. Returns `None` on a clean miss.
    pub async fn find_contact_by_identifier(&self, identifier: &str) -> Result<Option<Contact>> {
        let body = self.get_json("/contacts/search", &[("q", identifier)]).await?;
        let hits: Vec<Contact> = match body.get("payload") {
            Some(payload) => serde_json::from_value(payload.clone())?,
            None => Vec::new(),
        };
        let hit = hits.into_iter().find(|c| {
            c.identifier.as_deref() == Some(identifier)
                || c.custom_attributes.get("session_id").and_then(Value::as_str)
                    == Some(identifier)
        });
        if let Some(contact) = &hit {
            info!(contact_id = contact.id, identifier, "contact found");
        }
        Ok(hit)
    }

    /// Create a contact keyed by `identifier` (the session id). Email and
    /// phone are attached only when captured; Chatwoot accepts contacts
    /// with neither.
    pub async fn create_contact(
        &self,
        identifier: &str,
        profile: &ContactProfile,
    ) -> Result<Contact> {
        let mut payload = json!({
            "inbox_id": self.inbox_id,
            "name": profile.name,
            "identifier": identifier,
            "custom_attributes": {
                "session_id": identifier,
                "user_agent": profile.user_agent,
                "page_url": profile.page_url,
            },
        });
        if let Some(email) = &profile.email {
            payload["email"] = json!(email);
        }
        if let Some(phone) = &profile.phone {
            payload["phone_number"] = json!(phone);
        }

        let body = self.post_json("/contacts", &payload).await?;
        let contact: Contact = body
            .pointer("/payload/contact")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| Error::unexpected(ADAPTER, "create contact: missing payload.contact"))?;
        info!(contact_id = contact.id, identifier, "contact created");
        Ok(contact)
    }

    /// Search by identifier first; create only on a miss.
    ///
    /// At-least-once: this is a read-then-write against an external system
    /// with no transactional guarantee, so concurrent callers may each
    /// create a contact. Callers must tolerate duplicates.
    pub async fn get_or_create_contact(
        &self,
        identifier: &str,
        profile: &ContactProfile,
    ) -> Result<Contact> {
        if let Some(contact) = self.find_contact_by_identifier(identifier).await? {
            return Ok(contact);
        }
        debug!(identifier, "contact not found, creating");
        self.create_contact(identifier, profile).await
    }

    async fn open_conversation(&self, contact_id: i64) -> Result<Option<Conversation>> {
        let body = self
            .get_json(&format!("/contacts/{contact_id}/conversations"), &[])
            .await?;
        let conversations: Vec<Conversation> = match body.get("payload") {
            Some(payload) => serde_json::from_value(payload.clone())?,
            None => Vec::new(),
        };
        Ok(conversations
            .into_iter()
            .find(|c| c.status == "open" || c.status == "pending"))
    }

    /// Reuse the contact's open (or pending) conversation when one exists;
    /// create a new open conversation otherwise. The session id rides along
    /// as a custom attribute so webhook events can be correlated back.
    pub async fn get_or_create_conversation(
        &self,
        contact_id: i64,
        session_id: &str,
    ) -> Result<Conversation> {
        if let Some(conversation) = self.open_conversation(contact_id).await? {
            debug!(
                conversation_id = conversation.id,
                contact_id, "reusing open conversation"
            );
            return Ok(conversation);
        }

        let body = self
            .post_json(
                "/conversations",
                &json!({
                    "source_id": session_id,
                    "inbox_id": self.inbox_id,
                    "contact_id": contact_id,
                    "status": "open",
                    "custom_attributes": { "session_id": session_id },
                }),
            )
            .await?;
        let conversation: Conversation = serde_json::from_value(body)?;
        info!(
            conversation_id = conversation.id,
            contact_id, "conversation created"
        );
        Ok(conversation)
    }

    /// Append a message to a conversation. `content_attributes` carries
    /// provenance tags on agent replies (automated vs manual).
    pub async fn send_message(
        &self,
        conversation_id: i64,
        content: &str,
        direction: MessageDirection,
        content_attributes: Option<Value>,
    ) -> Result<Message> {
        let mut payload = json!({
            "content": content,
            "message_type": direction,
            "private": false,
            "content_type": "text",
        });
        if let Some(attrs) = content_attributes {
            payload["content_attributes"] = attrs;
        }

        let body = self
            .post_json(&format!("/conversations/{conversation_id}/messages"), &payload)
            .await?;
        let message: Message = serde_json::from_value(body)?;
        debug!(message_id = message.id, conversation_id, "message sent");
        Ok(message)
    }
}

#[async_trait]
impl ChannelAdapter for ChatwootAdapter {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    fn is_enabled(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }

    async fn send_inbound(
        &self,
        binding: &SessionBinding,
        text: &str,
        _attachments: &[Attachment],
    ) -> Result<Option<String>> {
        let conversation_id = binding
            .conversation_id
            .ok_or_else(|| Error::unexpected(ADAPTER, "no conversation bound to session"))?;
        let message = self
            .send_message(conversation_id, text, MessageDirection::Incoming, None)
            .await?;
        Ok(Some(message.id.to_string()))
    }

    async fn health_check(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.get_json("", &[]).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "chatwoot health check failed");
                false
            },
        }
    }
}

#[async_trait]
impl CrmChannel for ChatwootAdapter {
    async fn ensure_binding(
        &self,
        session_id: &str,
        profile: &ContactProfile,
    ) -> Result<CrmBinding> {
        let contact = self.get_or_create_contact(session_id, profile).await?;
        let conversation = self.get_or_create_conversation(contact.id, session_id).await?;
        Ok(CrmBinding {
            contact_id: contact.id,
            conversation_id: conversation.id,
        })
    }

    async fn replay_reply(
        &self,
        conversation_id: i64,
        text: &str,
        content_attributes: Value,
    ) -> Result<()> {
        self.send_message(
            conversation_id,
            text,
            MessageDirection::Outgoing,
            Some(content_attributes),
        )
        .await?;
        Ok(())
    }
}
