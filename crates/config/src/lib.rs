//! Environment-driven configuration for the parlor gateway.
//!
//! Every deployment knob is an environment variable (a `.env` file is
//! honored in development). `ParlorConfig::from_env()` never fails on
//! missing optional integrations — an adapter without credentials simply
//! comes up disabled — but malformed numbers and URLs are hard errors.

pub mod schema;

pub use schema::{
    AutomationConfig, ChatwootConfig, HighLevelConfig, ParlorConfig, RateLimitConfig, RedisConfig,
    SecurityConfig, ServerConfig, SocketConfig,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid number in {var}: {value}")]
    InvalidNumber { var: String, value: String },

    #[error("invalid URL in {var}: {value}")]
    InvalidUrl { var: String, value: String },

    #[error("missing required environment variable: {var}")]
    MissingVar { var: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub(crate) fn env_str(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn env_opt(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

pub(crate) fn env_u64(var: &str, default: u64) -> Result<u64> {
    match std::env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidNumber {
            var: var.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

pub(crate) fn env_bool(var: &str, default: bool) -> bool {
    match std::env::var(var) {
        Ok(raw) => raw == "true" || raw == "1",
        Err(_) => default,
    }
}

pub(crate) fn env_list(var: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(var) {
        Ok(raw) => raw.split(',').map(|v| v.trim().to_string()).collect(),
        Err(_) => default.iter().map(|v| (*v).to_string()).collect(),
    }
}
