//! Shared wire types and utilities used across all parlor crates.

pub mod correlate;
pub mod envelope;
pub mod types;

pub use {
    correlate::{fallback_contact_id, stable_hash},
    envelope::{ApiError, ApiResponse},
    types::{AgentReply, Attachment, AttachmentKind, InboundMessage, ReplySource},
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a message id for acknowledgments when no adapter issued one.
#[must_use]
pub fn generated_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4())
}
