//! HTTP response envelope shared by every API endpoint.
//!
//! Clients always receive either `{success: true, data, timestamp}` or
//! `{success: false, error: {code, message}, timestamp}`, never a raw
//! internal error.

use serde::{Deserialize, Serialize};

/// Structured error body with a machine-readable code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Uniform response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    /// Epoch milliseconds at the time the response was built.
    pub timestamp: u64,
}

impl<T> ApiResponse<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: crate::now_ms(),
        }
    }

    #[must_use]
    pub fn err(error: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            timestamp: crate::now_ms(),
        }
    }
}
