//! Session identity and lifecycle.
//!
//! A session is one visitor conversation, keyed by a client-persisted id
//! that survives reconnects. Records live in a TTL-bounded key/value store
//! (24h from last write) serialized as a flat JSON blob. The store gives no
//! guarantee beyond last-write-wins, so metadata merging happens here, on
//! the client side of every write.

pub mod error;
pub mod redis;
pub mod session;
pub mod store;

pub use {
    error::{Error, Result},
    redis::RedisSessionStore,
    session::{Session, SessionPatch},
    store::{MemorySessionStore, SessionStore},
};

/// Sessions expire after 24 hours of inactivity.
pub const SESSION_TTL_SECS: u64 = 86_400;

/// Store key prefix for session records.
pub const SESSION_KEY_PREFIX: &str = "session:";
