//! Redis-backed session store over a REST command endpoint
//! (Upstash-style: `POST /` with a JSON command array, bearer auth).
//!
//! Every write re-serializes the merged session as one flat JSON blob via
//! `SETEX`, which both persists and refreshes the 24h TTL in a single
//! command.

use std::time::Duration;

use {
    async_trait::async_trait,
    reqwest::Client,
    secrecy::{ExposeSecret, Secret},
    serde_json::{Value, json},
};

use crate::{
    Error, Result, SESSION_KEY_PREFIX, SESSION_TTL_SECS,
    session::{Session, SessionPatch},
    store::SessionStore,
};

pub struct RedisSessionStore {
    client: Client,
    rest_url: String,
    token: Secret<String>,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("rest_url", &self.rest_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

fn session_key(session_id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{session_id}")
}

impl RedisSessionStore {
    #[must_use]
    pub fn new(rest_url: impl Into<String>, token: Secret<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            rest_url: rest_url.into(),
            token,
        }
    }

    /// Execute one command array and return its `result` field.
    async fn command(&self, command: Value) -> Result<Value> {
        let mut body: Value = self
            .client
            .post(&self.rest_url)
            .bearer_auth(self.token.expose_secret())
            .json(&command)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = body.get("error").and_then(Value::as_str) {
            return Err(Error::unavailable(err));
        }
        Ok(body
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    async fn write(&self, session: &Session) -> Result<()> {
        let blob = serde_json::to_string(session)?;
        self.command(json!([
            "SETEX",
            session_key(&session.session_id),
            SESSION_TTL_SECS,
            blob
        ]))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let result = self.command(json!(["GET", session_key(session_id)])).await?;
        match result {
            Value::Null => Ok(None),
            Value::String(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            // Some REST proxies deserialize the blob for us.
            other => Ok(Some(serde_json::from_value(other)?)),
        }
    }

    async fn upsert(&self, session_id: &str, patch: SessionPatch) -> Result<Session> {
        let mut session = self
            .get(session_id)
            .await?
            .unwrap_or_else(|| Session::new(session_id));
        session.apply(patch);
        self.write(&session).await?;
        tracing::debug!(
            session_id,
            message_count = session.message_count,
            "session saved"
        );
        Ok(session)
    }

    async fn touch(&self, session_id: &str) -> Result<()> {
        self.command(json!(["EXPIRE", session_key(session_id), SESSION_TTL_SECS]))
            .await?;
        Ok(())
    }

    async fn exists(&self, session_id: &str) -> Result<bool> {
        let result = self
            .command(json!(["EXISTS", session_key(session_id)]))
            .await?;
        Ok(result.as_i64() == Some(1))
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.command(json!(["DEL", session_key(session_id)])).await?;
        Ok(())
    }

    async fn active_session_ids(&self) -> Result<Vec<String>> {
        let result = self
            .command(json!(["KEYS", format!("{SESSION_KEY_PREFIX}*")]))
            .await?;
        Ok(result
            .as_array()
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    .filter_map(|k| k.strip_prefix(SESSION_KEY_PREFIX))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn health_check(&self) -> bool {
        match self.command(json!(["PING"])).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "session store health check failed");
                false
            },
        }
    }
}
