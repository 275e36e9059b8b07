use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{State, WebSocketUpgrade},
        http::HeaderValue,
        response::IntoResponse,
        routing::{get, post},
    },
    tower_http::cors::{Any, CorsLayer},
    tracing::{info, warn},
};

use {
    crate::{routes, state::AppState, ws},
    parlor_adapters::{AutomationAdapter, ChatwootAdapter, HighLevelAdapter},
    parlor_config::ParlorConfig,
    parlor_router::{ConnectionRegistry, Router as MessageRouter},
    parlor_sessions::{MemorySessionStore, RedisSessionStore, SessionStore},
};

// ── State wiring ─────────────────────────────────────────────────────────────

/// Assemble the full routing stack from configuration: session store,
/// adapters, registry, limiters.
#[must_use]
pub fn build_state(config: ParlorConfig) -> AppState {
    let store: Arc<dyn SessionStore> = match (&config.redis.rest_url, &config.redis.rest_token) {
        (Some(url), Some(token)) => {
            info!("sessions: redis REST store");
            Arc::new(RedisSessionStore::new(url.clone(), token.clone()))
        },
        _ => {
            warn!("REDIS_REST_URL not set, sessions are in-memory and lost on restart");
            Arc::new(MemorySessionStore::new())
        },
    };

    let chatwoot = Arc::new(ChatwootAdapter::new(&config.chatwoot));
    let automation = Arc::new(AutomationAdapter::new(
        &config.automation,
        config.server.public_url.clone(),
        chatwoot.account_id(),
        chatwoot.inbox_id(),
    ));
    let legacy = Arc::new(HighLevelAdapter::new(&config.highlevel));
    let registry = Arc::new(ConnectionRegistry::new(config.socket.max_connections));

    let router = MessageRouter::new(
        store,
        chatwoot,
        automation,
        legacy,
        registry,
        &config.rate_limit,
    );
    AppState {
        router: Arc::new(router),
        config: Arc::new(config),
    }
}

// ── HTTP app ─────────────────────────────────────────────────────────────────

/// Build the axum app (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.security.cors_origins);
    Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .route("/api/chat/send", post(routes::chat_send))
        .route("/api/webhook/agent-response", post(routes::agent_response))
        .route("/api/webhook/chatwoot", post(routes::crm_webhook))
        .route("/api/health", get(routes::health))
        .route("/api/session/{session_id}", get(routes::session))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_connection(socket, state))
}

// ── Startup ──────────────────────────────────────────────────────────────────

pub async fn serve(config: ParlorConfig) -> anyhow::Result<()> {
    let state = build_state(config);
    let addr: SocketAddr = format!(
        "{}:{}",
        state.config.server.bind, state.config.server.port
    )
    .parse()?;
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "parlord listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
