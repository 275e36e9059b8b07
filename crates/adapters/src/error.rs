use thiserror::Error;

/// Crate-wide result type for adapter operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The adapter is not configured; callers should skip it.
    #[error("{adapter} adapter is not enabled")]
    Disabled { adapter: &'static str },

    /// The remote API answered with a non-success status.
    #[error("{adapter} API error ({status}): {message}")]
    Api {
        adapter: &'static str,
        status: u16,
        message: String,
    },

    /// The response arrived but did not carry the expected fields.
    #[error("{adapter} returned an unexpected payload: {message}")]
    UnexpectedPayload {
        adapter: &'static str,
        message: String,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn disabled(adapter: &'static str) -> Self {
        Self::Disabled { adapter }
    }

    #[must_use]
    pub fn unexpected(adapter: &'static str, message: impl std::fmt::Display) -> Self {
        Self::UnexpectedPayload {
            adapter,
            message: message.to_string(),
        }
    }

    pub(crate) async fn from_response(
        adapter: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(Self::Api {
            adapter,
            status: status.as_u16(),
            message,
        })
    }
}
