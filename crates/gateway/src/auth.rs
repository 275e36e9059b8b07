//! Shared-secret authentication for the agent-response webhook.

use {
    axum::http::HeaderMap,
    secrecy::{ExposeSecret, Secret},
    tracing::warn,
};

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Constant-time string comparison (prevents timing attacks).
#[must_use]
pub fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

/// Check the webhook secret header against the configured secret.
#[must_use]
pub fn webhook_authorized(headers: &HeaderMap, expected: &Secret<String>) -> bool {
    let Some(provided) = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!("webhook request without secret header");
        return false;
    };
    if safe_equal(provided, expected.expose_secret()) {
        true
    } else {
        warn!("webhook request with invalid secret");
        false
    }
}
