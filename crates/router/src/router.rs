//! The routing core: one inbound visitor message fans out to the CRM,
//! the legacy CRM, and the automation pipeline; agent replies fan back to
//! every live connection of the session.
//!
//! Ordering guarantees stop at the adapter boundary. Adapters are
//! dispatched sequentially for one message but never transactionally; a
//! failing adapter is logged and contained so the visitor still gets an
//! acknowledgment as long as validation and rate limiting passed.

use std::{sync::Arc, time::Duration};

use {
    chrono::Utc,
    serde::Serialize,
    serde_json::{Map, Value, json},
    tracing::{debug, info, warn},
};

use {
    crate::{
        crm_event::{CrmEvent, EVENT_CONVERSATION_STATUS_CHANGED, EVENT_MESSAGE_CREATED},
        error::{Error, RateLimitScope, Result},
        events::EventFrame,
        rate_limit::{Decision, FixedWindowLimiter},
        registry::ConnectionRegistry,
    },
    parlor_adapters::{ChannelAdapter, ContactProfile, CrmChannel, SessionBinding},
    parlor_common::{AgentReply, InboundMessage, ReplySource, generated_message_id, now_ms},
    parlor_config::RateLimitConfig,
    parlor_sessions::{Session, SessionPatch, SessionStore},
};

const HOUR_MS: u64 = 60 * 60 * 1000;

/// Which downstream integrations were live when a message was routed.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterFlags {
    pub crm: bool,
    pub automation: bool,
    pub legacy_crm: bool,
}

/// Acknowledgment returned to the sender of an inbound message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundAck {
    pub message_id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
    pub adapters: AdapterFlags,
}

/// Outcome of relaying an agent reply.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReplyReceipt {
    /// Connections that accepted the frame. Zero when the visitor is
    /// offline; the reply still lands in the CRM transcript.
    pub delivered: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthSummary {
    pub session_store: bool,
    pub crm: bool,
    pub automation: bool,
    pub legacy_crm: bool,
    pub connections: usize,
    pub active_sessions: usize,
}

impl HealthSummary {
    /// The session store is the only hard dependency; adapters are
    /// individually optional.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.session_store
    }
}

pub struct Router {
    store: Arc<dyn SessionStore>,
    crm: Arc<dyn CrmChannel>,
    automation: Arc<dyn ChannelAdapter>,
    legacy: Arc<dyn ChannelAdapter>,
    registry: Arc<ConnectionRegistry>,
    origin_limiter: FixedWindowLimiter,
    hourly_cap: u32,
}

impl Router {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        crm: Arc<dyn CrmChannel>,
        automation: Arc<dyn ChannelAdapter>,
        legacy: Arc<dyn ChannelAdapter>,
        registry: Arc<ConnectionRegistry>,
        limits: &RateLimitConfig,
    ) -> Self {
        Self {
            store,
            crm,
            automation,
            legacy,
            registry,
            origin_limiter: FixedWindowLimiter::new(
                limits.messages_per_window,
                Duration::from_millis(limits.window_ms),
            ),
            hourly_cap: limits.messages_per_hour,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Route one visitor message. `origin` keys the short-window limiter;
    /// callers pass the connection id (websocket) or client IP (HTTP).
    pub async fn handle_inbound(
        &self,
        origin: &str,
        message: &InboundMessage,
    ) -> Result<InboundAck> {
        if message.session_id.trim().is_empty() {
            return Err(Error::validation("sessionId is required"));
        }
        if message.text.trim().is_empty() && message.attachments.is_empty() {
            return Err(Error::validation("message text or attachments required"));
        }
        let session_id = message.session_id.as_str();

        if let Decision::Denied { retry_after } = self.origin_limiter.check(origin) {
            warn!(origin, session_id, "origin rate limit exceeded");
            return Err(Error::RateLimited {
                scope: RateLimitScope::Origin,
                retry_after,
            });
        }

        // One read covers both the hourly cap and session reuse. A store
        // failure skips the cap (fail open) rather than dropping traffic.
        let existing = match self.store.get(session_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(session_id, error = %e, "session read failed, hourly cap skipped");
                None
            },
        };
        if let Some(session) = &existing {
            let now = now_ms();
            if session.started_at > now.saturating_sub(HOUR_MS)
                && session.message_count >= self.hourly_cap
            {
                warn!(
                    session_id,
                    message_count = session.message_count,
                    "session hourly rate limit exceeded"
                );
                let window_ends = session.started_at.saturating_add(HOUR_MS);
                return Err(Error::RateLimited {
                    scope: RateLimitScope::SessionHourly,
                    retry_after: Duration::from_millis(window_ends.saturating_sub(now)),
                });
            }
        }

        let mut session = match existing {
            Some(session) => session,
            None => {
                info!(session_id, "creating session");
                self.write_session(
                    session_id,
                    SessionPatch::new().merge_metadata(&message.metadata),
                )
                .await
            },
        };

        // Bind CRM identifiers on first contact (or re-bind when the open
        // conversation was resolved away). Binding failure degrades to
        // hash-derived correlation ids downstream.
        if self.crm.is_enabled()
            && (session.contact_id.is_empty() || session.conversation_id().is_none())
        {
            match self
                .crm
                .ensure_binding(session_id, &ContactProfile::from_message(message))
                .await
            {
                Ok(binding) => {
                    session = self
                        .write_session(
                            session_id,
                            SessionPatch::new()
                                .contact_id(binding.contact_id.to_string())
                                .meta("conversationId", binding.conversation_id),
                        )
                        .await;
                },
                Err(e) => {
                    warn!(session_id, error = %e, "crm binding failed, continuing unbound");
                },
            }
        }

        let binding = SessionBinding::from_message(
            message,
            (!session.contact_id.is_empty()).then(|| session.contact_id.clone()),
            session.conversation_id(),
        );

        let mut crm_message_id = None;
        if self.crm.is_enabled() {
            match self
                .crm
                .send_inbound(&binding, &message.text, &message.attachments)
                .await
            {
                Ok(id) => crm_message_id = id,
                Err(e) => {
                    warn!(session_id, adapter = self.crm.name(), error = %e, "dispatch failed");
                },
            }
        }
        if self.legacy.is_enabled()
            && let Err(e) = self
                .legacy
                .send_inbound(&binding, &message.text, &message.attachments)
                .await
        {
            warn!(session_id, adapter = self.legacy.name(), error = %e, "dispatch failed");
        }
        let mut automation_message_id = None;
        if self.automation.is_enabled() {
            match self
                .automation
                .send_inbound(&binding, &message.text, &message.attachments)
                .await
            {
                Ok(id) => automation_message_id = id,
                Err(e) => {
                    warn!(session_id, adapter = self.automation.name(), error = %e, "dispatch failed");
                },
            }
        }

        let session = self
            .write_session(
                session_id,
                SessionPatch::new()
                    .merge_metadata(&message.metadata)
                    .counted(),
            )
            .await;

        self.registry
            .broadcast_to_session(session_id, &EventFrame::agent_typing());

        Ok(InboundAck {
            // The automation pipeline's id correlates the eventual reply,
            // so it wins over the CRM transcript id.
            message_id: automation_message_id
                .or(crm_message_id)
                .unwrap_or_else(generated_message_id),
            session_id: session_id.to_string(),
            contact_id: (!session.contact_id.is_empty()).then(|| session.contact_id.clone()),
            conversation_id: session.conversation_id(),
            adapters: AdapterFlags {
                crm: self.crm.is_enabled(),
                automation: self.automation.is_enabled(),
                legacy_crm: self.legacy.is_enabled(),
            },
        })
    }

    /// Relay an agent reply to every live connection of its session and
    /// keep the CRM transcript complete.
    pub async fn handle_agent_reply(
        &self,
        reply: &AgentReply,
        source: ReplySource,
    ) -> Result<ReplyReceipt> {
        if reply.session_id.trim().is_empty() {
            return Err(Error::validation("sessionId is required"));
        }
        if reply.text.trim().is_empty() {
            return Err(Error::validation("response text is required"));
        }

        let session = match self.store.get(&reply.session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return Err(Error::session_not_found(&reply.session_id)),
            Err(e) => {
                warn!(session_id = %reply.session_id, error = %e, "session read failed");
                return Err(Error::session_not_found(&reply.session_id));
            },
        };

        let source_tag = match source {
            ReplySource::AiAgent => "ai_agent",
            ReplySource::ManualAgent => "manual_agent",
        };
        let conversation_id = reply
            .metadata
            .get("conversationId")
            .and_then(Value::as_i64)
            .or_else(|| session.conversation_id());

        let mut metadata = reply.metadata.clone();
        metadata.insert("source".into(), json!(source_tag));
        if let Some(id) = conversation_id
            && !metadata.contains_key("conversationId")
        {
            metadata.insert("conversationId".into(), json!(id));
        }
        let timestamp = reply
            .timestamp
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        let delivered = self.registry.broadcast_to_session(
            &reply.session_id,
            &EventFrame::agent_response(&reply.text, &timestamp, Value::Object(metadata)),
        );
        if delivered == 0 {
            debug!(session_id = %reply.session_id, "no live connections, reply not delivered");
        }

        // Manual replies already live in the CRM; only automated ones are
        // replayed into the transcript.
        if source == ReplySource::AiAgent && self.crm.is_enabled() {
            match conversation_id {
                Some(conversation_id) => {
                    if let Err(e) = self
                        .crm
                        .replay_reply(
                            conversation_id,
                            &reply.text,
                            json!({ "source": source_tag, "automated": true }),
                        )
                        .await
                    {
                        warn!(session_id = %reply.session_id, error = %e, "crm replay failed");
                    }
                },
                None => {
                    debug!(session_id = %reply.session_id, "no conversation bound, replay skipped");
                },
            }
        }

        let stamp_key = match source {
            ReplySource::AiAgent => "lastAgentResponse",
            ReplySource::ManualAgent => "lastManualResponse",
        };
        let mut patch = SessionPatch::new().meta(stamp_key, now_ms());
        if source == ReplySource::ManualAgent
            && let Some(name) = reply.metadata.get("agentName").and_then(Value::as_str)
        {
            patch = patch.meta("lastAgentName", name);
        }
        self.write_session(&reply.session_id, patch).await;

        Ok(ReplyReceipt { delivered })
    }

    /// Process one CRM webhook event. Unknown events, filtered messages,
    /// and unknown sessions are all dropped without error; the webhook
    /// caller is acknowledged regardless.
    pub async fn handle_crm_event(&self, event: &CrmEvent) -> Result<Option<ReplyReceipt>> {
        match event.event.as_str() {
            EVENT_MESSAGE_CREATED => {
                if !event.is_manual_agent_reply() {
                    debug!("crm message event filtered");
                    return Ok(None);
                }
                let Some(session_id) = event.session_id() else {
                    warn!("crm conversation carries no session tag, reply dropped");
                    return Ok(None);
                };
                let Some(message) = &event.message else {
                    return Ok(None);
                };
                let Some(text) = message.content.as_deref().filter(|t| !t.trim().is_empty())
                else {
                    return Ok(None);
                };

                let mut metadata = Map::new();
                metadata.insert("messageId".into(), json!(message.id));
                if let Some(conversation) = &event.conversation {
                    metadata.insert("conversationId".into(), json!(conversation.id));
                }
                if let Some(sender) = &event.sender {
                    if let Some(name) = &sender.name {
                        metadata.insert("agentName".into(), json!(name));
                    }
                    if let Some(id) = sender.id {
                        metadata.insert("agentId".into(), json!(id));
                    }
                }
                let reply = AgentReply {
                    session_id: session_id.to_string(),
                    text: text.to_string(),
                    timestamp: event.message_timestamp(),
                    metadata,
                };
                match self.handle_agent_reply(&reply, ReplySource::ManualAgent).await {
                    Ok(receipt) => Ok(Some(receipt)),
                    Err(Error::SessionNotFound { session_id }) => {
                        warn!(%session_id, "manual reply for unknown session dropped");
                        Ok(None)
                    },
                    Err(e) => Err(e),
                }
            },
            EVENT_CONVERSATION_STATUS_CHANGED => {
                let (Some(session_id), Some(conversation)) =
                    (event.session_id(), event.conversation.as_ref())
                else {
                    return Ok(None);
                };
                match self.store.exists(session_id).await {
                    Ok(true) => {
                        let status = conversation.status.clone().unwrap_or_default();
                        info!(session_id, %status, "conversation status changed");
                        let mut patch = SessionPatch::new()
                            .meta("conversationStatus", status.clone())
                            .meta("statusChangedAt", now_ms());
                        // A closed conversation accepts no more messages;
                        // drop the binding so the next inbound message
                        // resolves a fresh open conversation.
                        if status != "open" && status != "pending" {
                            patch = patch.meta("conversationId", Value::Null);
                        }
                        self.write_session(session_id, patch).await;
                    },
                    Ok(false) => debug!(session_id, "status change for unknown session"),
                    Err(e) => warn!(session_id, error = %e, "session lookup failed"),
                }
                Ok(None)
            },
            other => {
                debug!(event = other, "ignoring crm event");
                Ok(None)
            },
        }
    }

    /// Bind a websocket connection to its session, creating the session
    /// when the join is the first thing the client does.
    pub async fn handle_join(&self, connection_id: &str, session_id: &str) -> Result<()> {
        if session_id.trim().is_empty() {
            return Err(Error::validation("sessionId is required"));
        }
        self.registry.bind(connection_id, session_id)?;
        match self.store.exists(session_id).await {
            Ok(true) => {
                if let Err(e) = self.store.touch(session_id).await {
                    warn!(session_id, error = %e, "session touch failed");
                }
            },
            Ok(false) => {
                info!(session_id, connection_id, "creating session on join");
                self.write_session(session_id, SessionPatch::new()).await;
            },
            Err(e) => warn!(session_id, error = %e, "session lookup failed on join"),
        }
        Ok(())
    }

    /// Session snapshot for the read-only session endpoint.
    pub async fn session(&self, session_id: &str) -> Result<Session> {
        match self.store.get(session_id).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(Error::session_not_found(session_id)),
            Err(e) => {
                warn!(session_id, error = %e, "session read failed");
                Err(Error::session_not_found(session_id))
            },
        }
    }

    pub async fn health_summary(&self) -> HealthSummary {
        let (session_store, crm, automation, legacy_crm) = tokio::join!(
            self.store.health_check(),
            self.crm.health_check(),
            self.automation.health_check(),
            self.legacy.health_check(),
        );
        HealthSummary {
            session_store,
            crm,
            automation,
            legacy_crm,
            connections: self.registry.count(),
            active_sessions: self.registry.active_sessions().len(),
        }
    }

    /// Best-effort store write. Failures are logged and the patch is
    /// applied to an in-memory copy so routing continues this message.
    async fn write_session(&self, session_id: &str, patch: SessionPatch) -> Session {
        match self.store.upsert(session_id, patch.clone()).await {
            Ok(session) => session,
            Err(e) => {
                warn!(session_id, error = %e, "session write failed, continuing in-memory");
                let mut session = Session::new(session_id);
                session.apply(patch);
                session
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use {async_trait::async_trait, tokio::sync::mpsc};

    use {
        super::*,
        parlor_adapters::CrmBinding,
        parlor_common::{Attachment, AttachmentKind},
        parlor_sessions::MemorySessionStore,
    };

    struct FakeCrm {
        enabled: bool,
        fail_binding: bool,
        fail_send: bool,
        binds: AtomicUsize,
        inbound: Mutex<Vec<String>>,
        replays: Mutex<Vec<(i64, String)>>,
    }

    impl FakeCrm {
        fn live() -> Self {
            Self {
                enabled: true,
                fail_binding: false,
                fail_send: false,
                binds: AtomicUsize::new(0),
                inbound: Mutex::new(Vec::new()),
                replays: Mutex::new(Vec::new()),
            }
        }

        fn offline() -> Self {
            Self {
                enabled: false,
                ..Self::live()
            }
        }
    }

    #[async_trait]
    impl ChannelAdapter for FakeCrm {
        fn name(&self) -> &'static str {
            "crm"
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn send_inbound(
            &self,
            binding: &SessionBinding,
            text: &str,
            _attachments: &[Attachment],
        ) -> parlor_adapters::Result<Option<String>> {
            if self.fail_send {
                return Err(parlor_adapters::Error::unexpected("crm", "send refused"));
            }
            let conversation_id = binding
                .conversation_id
                .ok_or_else(|| parlor_adapters::Error::unexpected("crm", "no conversation"))?;
            let mut inbound = self.inbound.lock().unwrap();
            inbound.push(format!("{conversation_id}:{text}"));
            Ok(Some(format!("crm-{}", inbound.len())))
        }

        async fn health_check(&self) -> bool {
            self.enabled
        }
    }

    #[async_trait]
    impl CrmChannel for FakeCrm {
        async fn ensure_binding(
            &self,
            _session_id: &str,
            _profile: &ContactProfile,
        ) -> parlor_adapters::Result<CrmBinding> {
            self.binds.fetch_add(1, Ordering::SeqCst);
            if self.fail_binding {
                return Err(parlor_adapters::Error::unexpected("crm", "binding refused"));
            }
            Ok(CrmBinding {
                contact_id: 42,
                conversation_id: 11,
            })
        }

        async fn replay_reply(
            &self,
            conversation_id: i64,
            text: &str,
            _content_attributes: Value,
        ) -> parlor_adapters::Result<()> {
            self.replays
                .lock()
                .unwrap()
                .push((conversation_id, text.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAdapter {
        enabled: bool,
        fail: bool,
        issued_id: Option<String>,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChannelAdapter for RecordingAdapter {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn send_inbound(
            &self,
            _binding: &SessionBinding,
            text: &str,
            _attachments: &[Attachment],
        ) -> parlor_adapters::Result<Option<String>> {
            if self.fail {
                return Err(parlor_adapters::Error::unexpected("recording", "down"));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(self.issued_id.clone())
        }

        async fn health_check(&self) -> bool {
            self.enabled && !self.fail
        }
    }

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn get(&self, _session_id: &str) -> parlor_sessions::Result<Option<Session>> {
            Err(parlor_sessions::Error::unavailable("store down"))
        }

        async fn upsert(
            &self,
            _session_id: &str,
            _patch: SessionPatch,
        ) -> parlor_sessions::Result<Session> {
            Err(parlor_sessions::Error::unavailable("store down"))
        }

        async fn touch(&self, _session_id: &str) -> parlor_sessions::Result<()> {
            Err(parlor_sessions::Error::unavailable("store down"))
        }

        async fn exists(&self, _session_id: &str) -> parlor_sessions::Result<bool> {
            Err(parlor_sessions::Error::unavailable("store down"))
        }

        async fn delete(&self, _session_id: &str) -> parlor_sessions::Result<()> {
            Err(parlor_sessions::Error::unavailable("store down"))
        }

        async fn active_session_ids(&self) -> parlor_sessions::Result<Vec<String>> {
            Err(parlor_sessions::Error::unavailable("store down"))
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    struct Harness {
        router: Router,
        store: Arc<MemorySessionStore>,
        crm: Arc<FakeCrm>,
        automation: Arc<RecordingAdapter>,
        registry: Arc<ConnectionRegistry>,
    }

    fn limits() -> RateLimitConfig {
        RateLimitConfig {
            messages_per_window: 100,
            window_ms: 60_000,
            messages_per_hour: 1_000,
        }
    }

    fn harness_with(crm: FakeCrm, limits: RateLimitConfig) -> Harness {
        let store = Arc::new(MemorySessionStore::new());
        let crm = Arc::new(crm);
        let automation = Arc::new(RecordingAdapter {
            enabled: true,
            issued_id: Some("auto-1".into()),
            ..RecordingAdapter::default()
        });
        let legacy = Arc::new(RecordingAdapter::default());
        let registry = Arc::new(ConnectionRegistry::new(16));
        let router = Router::new(
            store.clone(),
            crm.clone(),
            automation.clone(),
            legacy,
            registry.clone(),
            &limits,
        );
        Harness {
            router,
            store,
            crm,
            automation,
            registry,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeCrm::live(), limits())
    }

    fn message(session_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            session_id: session_id.into(),
            text: text.into(),
            attachments: Vec::new(),
            metadata: Map::new(),
        }
    }

    fn subscribe(h: &Harness, connection_id: &str, session_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        h.registry.register(connection_id, tx).unwrap();
        h.registry.bind(connection_id, session_id).unwrap();
        rx
    }

    fn frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn first_message_creates_session_and_binds_crm() {
        let h = harness();
        let ack = h
            .router
            .handle_inbound("conn-1", &message("sess-1", "hello"))
            .await
            .unwrap();

        assert_eq!(ack.message_id, "auto-1");
        assert_eq!(ack.contact_id.as_deref(), Some("42"));
        assert_eq!(ack.conversation_id, Some(11));
        assert!(ack.adapters.crm);
        assert!(ack.adapters.automation);
        assert!(!ack.adapters.legacy_crm);

        let session = h.store.get("sess-1").await.unwrap().unwrap();
        assert_eq!(session.contact_id, "42");
        assert_eq!(session.conversation_id(), Some(11));
        assert_eq!(session.message_count, 1);

        assert_eq!(*h.crm.inbound.lock().unwrap(), vec!["11:hello".to_string()]);
        assert_eq!(*h.automation.sent.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn binding_happens_once_per_session() {
        let h = harness();
        for text in ["one", "two", "three"] {
            h.router
                .handle_inbound("conn-1", &message("sess-1", text))
                .await
                .unwrap();
        }
        assert_eq!(h.crm.binds.load(Ordering::SeqCst), 1);

        let session = h.store.get("sess-1").await.unwrap().unwrap();
        assert_eq!(session.message_count, 3);
    }

    #[tokio::test]
    async fn inbound_broadcasts_typing_to_session_connections() {
        let h = harness();
        let mut rx = subscribe(&h, "conn-1", "sess-1");

        h.router
            .handle_inbound("conn-1", &message("sess-1", "hello"))
            .await
            .unwrap();

        assert_eq!(frame(&mut rx)["event"], "agent-typing");
    }

    #[tokio::test]
    async fn empty_message_and_missing_session_are_rejected() {
        let h = harness();

        let err = h
            .router
            .handle_inbound("conn-1", &message("", "hello"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_MESSAGE");

        let err = h
            .router
            .handle_inbound("conn-1", &message("sess-1", "   "))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_MESSAGE");
    }

    #[tokio::test]
    async fn attachment_only_messages_are_accepted() {
        let h = harness();
        let mut msg = message("sess-1", "");
        msg.attachments.push(Attachment {
            kind: AttachmentKind::Image,
            url: "https://cdn.example.com/shot.png".into(),
            file_size: Some(1024),
        });

        assert!(h.router.handle_inbound("conn-1", &msg).await.is_ok());
    }

    #[tokio::test]
    async fn origin_window_limits_independently_per_origin() {
        let h = harness_with(FakeCrm::live(), RateLimitConfig {
            messages_per_window: 1,
            window_ms: 60_000,
            messages_per_hour: 1_000,
        });

        h.router
            .handle_inbound("conn-1", &message("sess-1", "one"))
            .await
            .unwrap();
        let err = h
            .router
            .handle_inbound("conn-1", &message("sess-1", "two"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");

        // A different origin still gets through.
        h.router
            .handle_inbound("conn-2", &message("sess-1", "two"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn hourly_session_cap_rejects_with_its_own_code() {
        let h = harness_with(FakeCrm::live(), RateLimitConfig {
            messages_per_window: 100,
            window_ms: 60_000,
            messages_per_hour: 2,
        });

        h.router
            .handle_inbound("conn-1", &message("sess-1", "one"))
            .await
            .unwrap();
        h.router
            .handle_inbound("conn-1", &message("sess-1", "two"))
            .await
            .unwrap();
        let err = h
            .router
            .handle_inbound("conn-1", &message("sess-1", "three"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_RATE_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn crm_binding_failure_degrades_instead_of_blocking() {
        let h = harness_with(
            FakeCrm {
                fail_binding: true,
                ..FakeCrm::live()
            },
            limits(),
        );

        let ack = h
            .router
            .handle_inbound("conn-1", &message("sess-1", "hello"))
            .await
            .unwrap();
        assert_eq!(ack.message_id, "auto-1");
        assert!(ack.contact_id.is_none());
        assert_eq!(*h.automation.sent.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn crm_send_failure_does_not_stop_other_adapters() {
        let h = harness_with(
            FakeCrm {
                fail_send: true,
                ..FakeCrm::live()
            },
            limits(),
        );

        let ack = h
            .router
            .handle_inbound("conn-1", &message("sess-1", "hello"))
            .await
            .unwrap();
        assert_eq!(ack.message_id, "auto-1");
        assert_eq!(*h.automation.sent.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn store_outage_fails_open() {
        let automation = Arc::new(RecordingAdapter {
            enabled: true,
            issued_id: Some("auto-1".into()),
            ..RecordingAdapter::default()
        });
        let router = Router::new(
            Arc::new(FailingStore),
            Arc::new(FakeCrm::offline()),
            automation.clone(),
            Arc::new(RecordingAdapter::default()),
            Arc::new(ConnectionRegistry::new(16)),
            &limits(),
        );

        let ack = router
            .handle_inbound("conn-1", &message("sess-1", "hello"))
            .await
            .unwrap();
        assert_eq!(ack.message_id, "auto-1");
        assert_eq!(*automation.sent.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn agent_reply_reaches_every_connection_of_the_session() {
        let h = harness();
        h.router
            .handle_inbound("origin", &message("sess-1", "hello"))
            .await
            .unwrap();
        let mut rx1 = subscribe(&h, "conn-1", "sess-1");
        let mut rx2 = subscribe(&h, "conn-2", "sess-1");
        let mut other = subscribe(&h, "conn-3", "sess-other");

        let reply = AgentReply {
            session_id: "sess-1".into(),
            text: "hi, how can I help?".into(),
            timestamp: None,
            metadata: Map::new(),
        };
        let receipt = h
            .router
            .handle_agent_reply(&reply, ReplySource::AiAgent)
            .await
            .unwrap();
        assert_eq!(receipt.delivered, 2);

        for rx in [&mut rx1, &mut rx2] {
            let frame = frame(rx);
            assert_eq!(frame["event"], "agent-response");
            assert_eq!(frame["payload"]["message"], "hi, how can I help?");
            assert_eq!(frame["payload"]["metadata"]["source"], "ai_agent");
            assert_eq!(frame["payload"]["metadata"]["conversationId"], 11);
        }
        assert!(other.try_recv().is_err());

        // Automated replies are mirrored into the CRM transcript.
        assert_eq!(
            *h.crm.replays.lock().unwrap(),
            vec![(11, "hi, how can I help?".to_string())]
        );
        let session = h.store.get("sess-1").await.unwrap().unwrap();
        assert!(session.metadata.contains_key("lastAgentResponse"));
    }

    #[tokio::test]
    async fn reply_for_unknown_session_is_refused_without_broadcast() {
        let h = harness();
        let mut rx = subscribe(&h, "conn-1", "sess-1");

        let reply = AgentReply {
            session_id: "sess-1".into(),
            text: "anyone there?".into(),
            timestamp: None,
            metadata: Map::new(),
        };
        let err = h
            .router
            .handle_agent_reply(&reply, ReplySource::AiAgent)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn manual_replies_are_not_replayed_into_the_crm() {
        let h = harness();
        h.router
            .handle_inbound("origin", &message("sess-1", "hello"))
            .await
            .unwrap();
        h.crm.replays.lock().unwrap().clear();

        let reply = AgentReply {
            session_id: "sess-1".into(),
            text: "taking over".into(),
            timestamp: None,
            metadata: Map::new(),
        };
        h.router
            .handle_agent_reply(&reply, ReplySource::ManualAgent)
            .await
            .unwrap();

        assert!(h.crm.replays.lock().unwrap().is_empty());
        let session = h.store.get("sess-1").await.unwrap().unwrap();
        assert!(session.metadata.contains_key("lastManualResponse"));
    }

    #[tokio::test]
    async fn crm_webhook_relay_carries_agent_attribution() {
        let h = harness();
        h.router
            .handle_inbound("origin", &message("sess-1", "hello"))
            .await
            .unwrap();
        let mut rx = subscribe(&h, "conn-1", "sess-1");

        let event: CrmEvent = serde_json::from_value(serde_json::json!({
            "event": "message_created",
            "message": {
                "id": 501,
                "content": "an agent here",
                "message_type": "outgoing",
                "private": false,
                "created_at": 1_700_000_000,
            },
            "conversation": {"id": 11, "custom_attributes": {"session_id": "sess-1"}},
            "sender": {"id": 3, "name": "Dana", "type": "user"},
        }))
        .unwrap();

        let receipt = h.router.handle_crm_event(&event).await.unwrap().unwrap();
        assert_eq!(receipt.delivered, 1);

        let frame = frame(&mut rx);
        assert_eq!(frame["payload"]["message"], "an agent here");
        assert_eq!(frame["payload"]["metadata"]["source"], "manual_agent");
        assert_eq!(frame["payload"]["metadata"]["agentName"], "Dana");

        // The reply came from the CRM, so it never goes back into it.
        assert!(h.crm.replays.lock().unwrap().is_empty());

        let session = h.store.get("sess-1").await.unwrap().unwrap();
        assert_eq!(
            session.metadata.get("lastAgentName"),
            Some(&Value::String("Dana".into()))
        );
    }

    #[tokio::test]
    async fn crm_webhook_for_unknown_session_is_dropped_quietly() {
        let h = harness();
        let event: CrmEvent = serde_json::from_value(serde_json::json!({
            "event": "message_created",
            "message": {"id": 1, "content": "hi", "message_type": "outgoing", "private": false},
            "conversation": {"id": 11, "custom_attributes": {"session_id": "sess-ghost"}},
            "sender": {"type": "user"},
        }))
        .unwrap();

        assert!(h.router.handle_crm_event(&event).await.unwrap().is_none());
        assert!(h.store.get("sess-ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_change_updates_existing_sessions_only() {
        let h = harness();
        h.router
            .handle_inbound("origin", &message("sess-1", "hello"))
            .await
            .unwrap();

        let event: CrmEvent = serde_json::from_value(serde_json::json!({
            "event": "conversation_status_changed",
            "conversation": {
                "id": 11,
                "status": "resolved",
                "custom_attributes": {"session_id": "sess-1"},
            },
        }))
        .unwrap();
        h.router.handle_crm_event(&event).await.unwrap();

        let session = h.store.get("sess-1").await.unwrap().unwrap();
        assert_eq!(
            session.metadata.get("conversationStatus"),
            Some(&Value::String("resolved".into()))
        );

        let ghost: CrmEvent = serde_json::from_value(serde_json::json!({
            "event": "conversation_status_changed",
            "conversation": {
                "id": 12,
                "status": "resolved",
                "custom_attributes": {"session_id": "sess-ghost"},
            },
        }))
        .unwrap();
        h.router.handle_crm_event(&ghost).await.unwrap();
        assert!(h.store.get("sess-ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolved_conversation_rebinds_on_the_next_message() {
        let h = harness();
        h.router
            .handle_inbound("origin", &message("sess-1", "hello"))
            .await
            .unwrap();
        assert_eq!(h.crm.binds.load(Ordering::SeqCst), 1);

        let event: CrmEvent = serde_json::from_value(serde_json::json!({
            "event": "conversation_status_changed",
            "conversation": {
                "id": 11,
                "status": "resolved",
                "custom_attributes": {"session_id": "sess-1"},
            },
        }))
        .unwrap();
        h.router.handle_crm_event(&event).await.unwrap();

        let session = h.store.get("sess-1").await.unwrap().unwrap();
        assert_eq!(session.conversation_id(), None);

        h.router
            .handle_inbound("origin", &message("sess-1", "still there?"))
            .await
            .unwrap();
        assert_eq!(h.crm.binds.load(Ordering::SeqCst), 2);
        let session = h.store.get("sess-1").await.unwrap().unwrap();
        assert_eq!(session.conversation_id(), Some(11));
    }

    #[tokio::test]
    async fn join_creates_the_session_without_counting_a_message() {
        let h = harness();
        let _rx = subscribe(&h, "conn-1", "sess-1");
        h.router.handle_join("conn-1", "sess-1").await.unwrap();

        let session = h.store.get("sess-1").await.unwrap().unwrap();
        assert_eq!(session.message_count, 0);

        // Re-join of the same session is a no-op.
        h.router.handle_join("conn-1", "sess-1").await.unwrap();
        assert!(h.router.handle_join("conn-1", "sess-2").await.is_err());
    }

    #[tokio::test]
    async fn health_summary_tracks_store_and_adapters() {
        let h = harness();
        let _rx = subscribe(&h, "conn-1", "sess-1");

        let summary = h.router.health_summary().await;
        assert!(summary.healthy());
        assert!(summary.crm);
        assert!(summary.automation);
        assert!(!summary.legacy_crm);
        assert_eq!(summary.connections, 1);
        assert_eq!(summary.active_sessions, 1);
    }

    #[tokio::test]
    async fn health_summary_reports_store_outage() {
        let router = Router::new(
            Arc::new(FailingStore),
            Arc::new(FakeCrm::offline()),
            Arc::new(RecordingAdapter::default()),
            Arc::new(RecordingAdapter::default()),
            Arc::new(ConnectionRegistry::new(16)),
            &limits(),
        );
        assert!(!router.health_summary().await.healthy());
    }
}
