use std::time::{Duration, Instant};

use {async_trait::async_trait, dashmap::DashMap};

use crate::{
    Result, SESSION_TTL_SECS,
    session::{Session, SessionPatch},
};

/// Durable, TTL-bounded session state.
///
/// Implementations must tolerate many concurrent callers; the backing store
/// is last-write-wins and patches are merged client-side before each write.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    /// Merge `patch` into the stored session (creating one seeded at `now`
    /// if absent), refresh `last_message_at` and the TTL, and return the
    /// merged record.
    async fn upsert(&self, session_id: &str, patch: SessionPatch) -> Result<Session>;

    /// TTL refresh only; no counter or timestamp mutation. Used on
    /// reconnect/join when no new message is present.
    async fn touch(&self, session_id: &str) -> Result<()>;

    async fn exists(&self, session_id: &str) -> Result<bool>;

    /// Administrative removal. Sessions otherwise expire on their own.
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// All non-expired session ids (debug/health surface).
    async fn active_session_ids(&self) -> Result<Vec<String>>;

    async fn health_check(&self) -> bool;
}

struct MemoryEntry {
    session: Session,
    expires_at: Instant,
}

/// In-process session store with the same TTL semantics as the Redis
/// implementation. Used in tests and as the fallback when no store is
/// configured.
pub struct MemorySessionStore {
    entries: DashMap<String, MemoryEntry>,
    ttl: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(SESSION_TTL_SECS))
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn get_live(&self, session_id: &str) -> Option<Session> {
        let expired = match self.entries.get(session_id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(entry.session.clone());
            },
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(session_id);
        }
        None
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.get_live(session_id))
    }

    async fn upsert(&self, session_id: &str, patch: SessionPatch) -> Result<Session> {
        let mut session = self
            .get_live(session_id)
            .unwrap_or_else(|| Session::new(session_id));
        session.apply(patch);
        self.entries.insert(session_id.to_string(), MemoryEntry {
            session: session.clone(),
            expires_at: Instant::now() + self.ttl,
        });
        Ok(session)
    }

    async fn touch(&self, session_id: &str) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(session_id) {
            entry.expires_at = Instant::now() + self.ttl;
        }
        Ok(())
    }

    async fn exists(&self, session_id: &str) -> Result<bool> {
        Ok(self.get_live(session_id).is_some())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.entries.remove(session_id);
        Ok(())
    }

    async fn active_session_ids(&self) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn health_check(&self) -> bool {
        true
    }
}
