//! Typed configuration sections, one per subsystem.

use {
    secrecy::{ExposeSecret, Secret},
    tracing::warn,
};

use crate::{ConfigError, Result, env_bool, env_list, env_opt, env_str, env_u64};

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Public base URL, used to absolutize attachment paths.
    pub public_url: String,
}

/// Chatwoot CRM adapter. Disabled unless both URL and API key are present.
#[derive(Clone)]
pub struct ChatwootConfig {
    pub api_url: Option<String>,
    pub api_key: Option<Secret<String>>,
    pub account_id: String,
    pub inbox_id: String,
}

/// Automation webhook (AI pipeline) adapter.
#[derive(Clone)]
pub struct AutomationConfig {
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<Secret<String>>,
    pub enabled: bool,
    pub timeout_ms: u64,
}

/// Legacy HighLevel CRM fallback adapter.
#[derive(Clone)]
pub struct HighLevelConfig {
    pub api_url: String,
    pub api_key: Option<Secret<String>>,
    pub location_id: String,
}

/// Upstash-style Redis REST session store.
#[derive(Clone)]
pub struct RedisConfig {
    pub rest_url: Option<String>,
    pub rest_token: Option<Secret<String>>,
}

/// Webhook authentication and CORS.
#[derive(Clone)]
pub struct SecurityConfig {
    pub webhook_secret: Secret<String>,
    pub cors_origins: Vec<String>,
}

/// Real-time connection limits.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub max_connections: usize,
}

/// Inbound admission control.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub messages_per_window: usize,
    pub window_ms: u64,
    pub messages_per_hour: u32,
}

/// Root configuration.
#[derive(Clone)]
pub struct ParlorConfig {
    pub server: ServerConfig,
    pub chatwoot: ChatwootConfig,
    pub automation: AutomationConfig,
    pub highlevel: HighLevelConfig,
    pub redis: RedisConfig,
    pub security: SecurityConfig,
    pub socket: SocketConfig,
    pub rate_limit: RateLimitConfig,
}

impl std::fmt::Debug for ParlorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParlorConfig")
            .field("server", &self.server)
            .field("socket", &self.socket)
            .field("rate_limit", &self.rate_limit)
            .field("chatwoot_enabled", &self.chatwoot.is_configured())
            .field("automation_enabled", &self.automation.enabled)
            .field("redis_configured", &self.redis.rest_url.is_some())
            .finish()
    }
}

impl ChatwootConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_url.is_some() && self.api_key.is_some()
    }
}

impl ParlorConfig {
    /// Build the configuration from the process environment. A `.env` file
    /// in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let port = env_u64("PORT", 3000)?;
        let config = Self {
            server: ServerConfig {
                bind: env_str("BIND", "0.0.0.0"),
                port: port as u16,
                public_url: env_str("PUBLIC_URL", "http://localhost:3000"),
            },
            chatwoot: ChatwootConfig {
                api_url: env_opt("CHATWOOT_API_URL"),
                api_key: env_opt("CHATWOOT_API_KEY").map(Secret::new),
                account_id: env_str("CHATWOOT_ACCOUNT_ID", "1"),
                inbox_id: env_str("CHATWOOT_INBOX_ID", "1"),
            },
            automation: AutomationConfig {
                webhook_url: env_opt("AUTOMATION_WEBHOOK_URL"),
                webhook_secret: env_opt("AUTOMATION_WEBHOOK_SECRET").map(Secret::new),
                enabled: env_bool("AUTOMATION_ENABLED", true),
                timeout_ms: env_u64("AUTOMATION_TIMEOUT_MS", 30_000)?,
            },
            highlevel: HighLevelConfig {
                api_url: env_str("HIGHLEVEL_API_URL", "https://services.leadconnectorhq.com"),
                api_key: env_opt("HIGHLEVEL_API_KEY").map(Secret::new),
                location_id: env_str("HIGHLEVEL_LOCATION_ID", ""),
            },
            redis: RedisConfig {
                rest_url: env_opt("REDIS_REST_URL"),
                rest_token: env_opt("REDIS_REST_TOKEN").map(Secret::new),
            },
            security: SecurityConfig {
                webhook_secret: Secret::new(env_str("WEBHOOK_SECRET", "")),
                cors_origins: env_list("CORS_ORIGINS", &[
                    "http://localhost:5173",
                    "http://localhost:3000",
                ]),
            },
            socket: SocketConfig {
                max_connections: env_u64("SOCKET_MAX_CONNECTIONS", 1000)? as usize,
            },
            rate_limit: RateLimitConfig {
                messages_per_window: env_u64("RATE_LIMIT_MESSAGES_PER_MINUTE", 10)? as usize,
                window_ms: env_u64("RATE_LIMIT_WINDOW_MS", 60_000)?,
                messages_per_hour: env_u64("RATE_LIMIT_MESSAGES_PER_HOUR", 100)? as u32,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate URLs and warn about weak secrets. Warnings never abort
    /// startup; malformed values do.
    pub fn validate(&self) -> Result<()> {
        for (var, value) in [
            ("PUBLIC_URL", Some(&self.server.public_url)),
            ("CHATWOOT_API_URL", self.chatwoot.api_url.as_ref()),
            ("AUTOMATION_WEBHOOK_URL", self.automation.webhook_url.as_ref()),
            ("REDIS_REST_URL", self.redis.rest_url.as_ref()),
        ] {
            if let Some(value) = value
                && url::Url::parse(value).is_err()
            {
                return Err(ConfigError::InvalidUrl {
                    var: var.to_string(),
                    value: value.clone(),
                });
            }
        }

        for origin in &self.security.cors_origins {
            if origin != "*" && url::Url::parse(origin).is_err() {
                return Err(ConfigError::InvalidUrl {
                    var: "CORS_ORIGINS".to_string(),
                    value: origin.clone(),
                });
            }
        }

        let secret = self.security.webhook_secret.expose_secret();
        if secret.is_empty() {
            warn!("WEBHOOK_SECRET is not set; reply webhook authentication is disabled");
        } else if secret.len() < 32 {
            warn!("WEBHOOK_SECRET is shorter than 32 characters");
        }

        if self.redis.rest_url.is_none() {
            warn!("REDIS_REST_URL not set; falling back to the in-memory session store");
        }

        Ok(())
    }
}
