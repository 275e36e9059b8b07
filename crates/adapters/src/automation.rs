//! Automation webhook adapter: the ingress of the AI processing pipeline.
//!
//! Stateless — every call builds a Chatwoot-compatible envelope and POSTs
//! it. The pipeline requires numeric conversation/contact ids; real CRM
//! ids are used when the session has them, otherwise ids are derived from
//! the session id with [`parlor_common::stable_hash`] so repeated
//! dispatches for one session correlate to the same external conversation
//! across process restarts.

use std::time::Duration;

use {
    async_trait::async_trait,
    reqwest::Client,
    secrecy::{ExposeSecret, Secret},
    serde_json::{Value, json},
    tracing::{info, warn},
};

use {
    crate::{
        Error, Result,
        adapter::{ChannelAdapter, SessionBinding},
    },
    parlor_common::{Attachment, fallback_contact_id, stable_hash},
};

const ADAPTER: &str = "automation";

/// Header carrying the shared webhook secret.
pub const SECRET_HEADER: &str = "X-Automation-Webhook-Secret";

pub struct AutomationAdapter {
    client: Client,
    webhook_url: Option<String>,
    secret: Option<Secret<String>>,
    enabled: bool,
    public_url: String,
    account_id: i64,
    inbox_id: i64,
}

impl std::fmt::Debug for AutomationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationAdapter")
            .field("webhook_url", &self.webhook_url)
            .field("secret", &"[REDACTED]")
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl AutomationAdapter {
    #[must_use]
    pub fn new(
        config: &parlor_config::AutomationConfig,
        public_url: impl Into<String>,
        account_id: Option<i64>,
        inbox_id: Option<i64>,
    ) -> Self {
        let enabled = config.enabled && config.webhook_url.is_some();
        if !enabled {
            warn!("automation adapter not enabled: AUTOMATION_WEBHOOK_URL missing or disabled");
        }
        Self {
            client: Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .build()
                .unwrap_or_default(),
            webhook_url: config.webhook_url.clone(),
            secret: config.webhook_secret.clone(),
            enabled,
            public_url: public_url.into(),
            account_id: account_id.unwrap_or(1),
            inbox_id: inbox_id.unwrap_or(1),
        }
    }

    fn absolutize(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{url}", self.public_url.trim_end_matches('/'))
        } else {
            url.to_string()
        }
    }

    /// Build the webhook envelope. Separated from the send path so the
    /// payload shape is unit-testable without a server.
    #[must_use]
    pub fn build_payload(
        &self,
        binding: &SessionBinding,
        text: &str,
        attachments: &[Attachment],
    ) -> Value {
        let conversation_id = binding
            .conversation_id
            .unwrap_or_else(|| i64::from(stable_hash(&binding.session_id)));
        let contact_id = binding
            .contact_id
            .as_deref()
            .and_then(|id| id.parse::<i64>().ok())
            .unwrap_or_else(|| i64::from(fallback_contact_id(&binding.session_id)));

        let attachments: Vec<Value> = attachments
            .iter()
            .map(|att| {
                json!({
                    "file_type": att.kind,
                    "data_url": self.absolutize(&att.url),
                    "file_size": att.file_size.unwrap_or(0),
                })
            })
            .collect();

        let mut payload = json!({
            "message_type": "incoming",
            "content": text,
            "conversation": {
                "id": conversation_id,
                "status": "open",
                "custom_attributes": {
                    "sessionId": binding.session_id,
                    "pageUrl": binding.metadata.get("pageUrl"),
                },
            },
            "sender": {
                "id": contact_id,
                "name": binding.sender_name,
                // The pipeline keys visitors on phone_number; the session id
                // stands in when no phone was captured.
                "phone_number": binding.phone.as_deref().unwrap_or(&binding.session_id),
                "email": binding.email,
                "custom_attributes": { "sessionId": binding.session_id },
            },
            "account": { "id": self.account_id },
            "inbox": { "id": self.inbox_id },
            "metadata": Value::Object(binding.metadata.clone()),
            "source": "widget",
        });
        if !attachments.is_empty() {
            payload["attachments"] = Value::Array(attachments);
        }
        payload
    }
}

#[async_trait]
impl ChannelAdapter for AutomationAdapter {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send_inbound(
        &self,
        binding: &SessionBinding,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<Option<String>> {
        let url = match (&self.webhook_url, self.enabled) {
            (Some(url), true) => url,
            _ => return Err(Error::disabled(ADAPTER)),
        };

        let payload = self.build_payload(binding, text, attachments);
        let mut request = self.client.post(url).json(&payload);
        if let Some(secret) = &self.secret {
            request = request.header(SECRET_HEADER, secret.expose_secret());
        }

        let response = Error::from_response(ADAPTER, request.send().await?).await?;
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message_id = body
            .get("messageId")
            .or_else(|| body.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);

        info!(
            session_id = %binding.session_id,
            message_id = message_id.as_deref().unwrap_or("-"),
            "message dispatched to automation pipeline"
        );
        Ok(message_id)
    }

    async fn health_check(&self) -> bool {
        self.enabled
            && self
                .webhook_url
                .as_deref()
                .is_some_and(|u| url::Url::parse(u).is_ok())
    }
}
