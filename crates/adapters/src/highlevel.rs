//! HighLevel legacy CRM fallback adapter.
//!
//! Kept for deployments still routed through HighLevel: contact lookup by
//! phone or email, upsert with a widget tag, and channel message sends.
//! Message content must be reshaped per target channel — the Email channel
//! takes HTML, so plain widget text is wrapped before sending.

use std::time::Duration;

use {
    async_trait::async_trait,
    reqwest::Client,
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::{info, warn},
};

use {
    crate::{
        Error, Result,
        adapter::{ChannelAdapter, SessionBinding},
    },
    parlor_common::Attachment,
    parlor_config::HighLevelConfig,
};

const ADAPTER: &str = "highlevel";
const API_VERSION: &str = "2021-07-28";

/// Target channel for an outbound HighLevel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HlChannel {
    Sms,
    Email,
    Live,
}

impl HlChannel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "SMS",
            Self::Email => "Email",
            Self::Live => "Live_Chat",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HlContact {
    pub id: String,
}

pub struct HighLevelAdapter {
    client: Client,
    api_url: String,
    api_key: Option<Secret<String>>,
    location_id: String,
}

impl std::fmt::Debug for HighLevelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighLevelAdapter")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("location_id", &self.location_id)
            .finish()
    }
}

/// Reshape plain widget text for the target channel. The Email channel
/// renders HTML; everything else takes the text as-is.
#[must_use]
pub fn format_content(channel: HlChannel, text: &str) -> String {
    match channel {
        HlChannel::Email => {
            let escaped = text
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            format!("<p>{}</p>", escaped.replace('\n', "<br>"))
        },
        HlChannel::Sms | HlChannel::Live => text.to_string(),
    }
}

impl HighLevelAdapter {
    #[must_use]
    pub fn new(config: &HighLevelConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            location_id: config.location_id.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let key = self.api_key.as_ref().ok_or_else(|| Error::disabled(ADAPTER))?;
        Ok(self
            .client
            .request(method, format!("{}{path}", self.api_url))
            .bearer_auth(key.expose_secret())
            .header("Version", API_VERSION))
    }

    /// Look a contact up by phone (preferred) or email. `None` on a miss.
    pub async fn find_contact(
        &self,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<HlContact>> {
        let query = phone
            .or(email)
            .ok_or_else(|| Error::unexpected(ADAPTER, "phone or email required for lookup"))?;

        let response = self
            .request(reqwest::Method::GET, "/contacts/search")?
            .query(&[("locationId", self.location_id.as_str()), ("query", query)])
            .send()
            .await?;
        let body: Value = Error::from_response(ADAPTER, response)
            .await?
            .json()
            .await?;

        let contact = body
            .pointer("/contacts/0")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?;
        Ok(contact)
    }

    /// Update the matched contact or create a new one tagged as a widget
    /// lead. The session id is stored as a custom field either way.
    pub async fn upsert_contact(&self, binding: &SessionBinding) -> Result<HlContact> {
        let session_field = json!([{
            "field": "widget_session_id",
            "value": binding.session_id,
        }]);

        if let Some(existing) = self
            .find_contact(binding.phone.as_deref(), binding.email.as_deref())
            .await?
        {
            let response = self
                .request(reqwest::Method::PUT, &format!("/contacts/{}", existing.id))?
                .json(&json!({
                    "email": binding.email,
                    "phone": binding.phone,
                    "customFields": session_field,
                }))
                .send()
                .await?;
            let body: Value = Error::from_response(ADAPTER, response)
                .await?
                .json()
                .await?;
            let contact: HlContact = body
                .pointer("/contact")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .ok_or_else(|| Error::unexpected(ADAPTER, "update: missing contact"))?;
            info!(contact_id = %contact.id, "legacy contact updated");
            return Ok(contact);
        }

        let response = self
            .request(reqwest::Method::POST, "/contacts")?
            .json(&json!({
                "name": binding.sender_name,
                "email": binding.email,
                "phone": binding.phone,
                "locationId": self.location_id,
                "tags": ["widget-chat"],
                "customFields": session_field,
            }))
            .send()
            .await?;
        let body: Value = Error::from_response(ADAPTER, response)
            .await?
            .json()
            .await?;
        let contact: HlContact = body
            .pointer("/contact")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| Error::unexpected(ADAPTER, "create: missing contact"))?;
        info!(contact_id = %contact.id, "legacy contact created");
        Ok(contact)
    }

    /// Send one message to a contact over the given channel.
    pub async fn send_channel_message(
        &self,
        channel: HlChannel,
        contact_id: &str,
        text: &str,
    ) -> Result<Option<String>> {
        let content = format_content(channel, text);
        let mut payload = json!({
            "type": channel.as_str(),
            "contactId": contact_id,
            "locationId": self.location_id,
        });
        match channel {
            HlChannel::Email => payload["html"] = json!(content),
            HlChannel::Sms | HlChannel::Live => payload["message"] = json!(content),
        }

        let response = self
            .request(reqwest::Method::POST, "/conversations/messages")?
            .json(&payload)
            .send()
            .await?;
        let body: Value = Error::from_response(ADAPTER, response)
            .await?
            .json()
            .await?;
        Ok(body
            .get("messageId")
            .or_else(|| body.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

#[async_trait]
impl ChannelAdapter for HighLevelAdapter {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    fn is_enabled(&self) -> bool {
        self.api_key.is_some() && !self.location_id.is_empty()
    }

    async fn send_inbound(
        &self,
        binding: &SessionBinding,
        text: &str,
        _attachments: &[Attachment],
    ) -> Result<Option<String>> {
        if !self.is_enabled() {
            return Err(Error::disabled(ADAPTER));
        }
        // The legacy flow only works for identified visitors.
        if binding.phone.is_none() && binding.email.is_none() {
            warn!(session_id = %binding.session_id, "skipping legacy CRM: no phone or email");
            return Ok(None);
        }

        let contact = self.upsert_contact(binding).await?;
        let channel = if binding.phone.is_some() {
            HlChannel::Sms
        } else {
            HlChannel::Email
        };
        self.send_channel_message(channel, &contact.id, text).await
    }

    async fn health_check(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let request = match self.request(
            reqwest::Method::GET,
            &format!("/locations/{}", self.location_id),
        ) {
            Ok(request) => request,
            Err(_) => return false,
        };
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "highlevel health check failed");
                false
            },
        }
    }
}
