use {std::time::Duration, thiserror::Error};

pub type Result<T> = std::result::Result<T, Error>;

/// Which limiter refused the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    /// Short fixed-window limit keyed by origin (connection or IP).
    Origin,
    /// Rolling per-session hourly ceiling.
    SessionHourly,
}

/// Routing failures that reach a client. Every variant maps to a stable
/// wire code so the widget can branch on it without parsing prose.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{message}")]
    Validation { message: String },

    #[error("rate limit exceeded, retry after {}s", retry_after.as_secs())]
    RateLimited {
        scope: RateLimitScope,
        retry_after: Duration,
    },

    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("connection limit reached ({max})")]
    CapacityExceeded { max: usize },
}

impl Error {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    /// Stable machine-readable code for the client error envelope.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "INVALID_MESSAGE",
            Self::RateLimited {
                scope: RateLimitScope::Origin,
                ..
            } => "RATE_LIMIT_EXCEEDED",
            Self::RateLimited {
                scope: RateLimitScope::SessionHourly,
                ..
            } => "SESSION_RATE_LIMIT_EXCEEDED",
            Self::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            Self::CapacityExceeded { .. } => "MAX_CONNECTIONS",
        }
    }
}
