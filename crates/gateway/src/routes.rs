//! HTTP API handlers. Every response uses the shared envelope; clients
//! never see a raw framework error for a routed request.

use std::net::SocketAddr;

use {
    axum::{
        Json,
        extract::{ConnectInfo, Path, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
    },
    serde_json::{Value, json},
    tracing::warn,
};

use {
    crate::{auth, state::AppState},
    parlor_common::{AgentReply, ApiError, ApiResponse, InboundMessage, ReplySource},
    parlor_router::{CrmEvent, Error as RouterError},
};

fn failure(err: &RouterError) -> Response {
    let status = match err {
        RouterError::Validation { .. } => StatusCode::BAD_REQUEST,
        RouterError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        RouterError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
        RouterError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body: ApiResponse<Value> = ApiResponse::err(ApiError::new(err.code(), err.to_string()));
    (status, Json(body)).into_response()
}

/// POST /api/chat/send — inbound message over plain HTTP. The client IP
/// keys the short-window limiter, standing in for a connection id.
pub async fn chat_send(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(message): Json<InboundMessage>,
) -> Response {
    let origin = addr.ip().to_string();
    match state.router.handle_inbound(&origin, &message).await {
        Ok(ack) => Json(ApiResponse::ok(ack)).into_response(),
        Err(e) => failure(&e),
    }
}

/// POST /api/webhook/agent-response — the automation pipeline delivering
/// an AI reply. Authenticated with the shared webhook secret.
pub async fn agent_response(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(reply): Json<AgentReply>,
) -> Response {
    if !auth::webhook_authorized(&headers, &state.config.security.webhook_secret) {
        let body: ApiResponse<Value> =
            ApiResponse::err(ApiError::new("INVALID_SIGNATURE", "Invalid webhook secret"));
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }
    match state
        .router
        .handle_agent_reply(&reply, ReplySource::AiAgent)
        .await
    {
        Ok(receipt) => Json(ApiResponse::ok(json!({
            "delivered": receipt.delivered,
            "sessionId": reply.session_id,
        })))
        .into_response(),
        Err(e) => failure(&e),
    }
}

/// POST /api/webhook/chatwoot — CRM event firehose. Always acknowledged
/// with 200 so the CRM does not retry events we chose to drop.
pub async fn crm_webhook(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let event_name = payload
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    match serde_json::from_value::<CrmEvent>(payload) {
        Ok(event) => {
            if let Err(e) = state.router.handle_crm_event(&event).await {
                warn!(event = %event_name, error = %e, "crm webhook processing failed");
            }
        },
        Err(e) => warn!(event = %event_name, error = %e, "unparseable crm webhook payload"),
    }
    Json(ApiResponse::ok(json!({ "received": true, "event": event_name }))).into_response()
}

/// GET /api/health — aggregate status; 503 when the session store is down.
pub async fn health(State(state): State<AppState>) -> Response {
    let summary = state.router.health_summary().await;
    let status = if summary.healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ApiResponse::ok(json!({
        "status": if summary.healthy() { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "services": summary,
    }));
    (status, Json(body)).into_response()
}

/// GET /api/session/{session_id} — read-only session snapshot.
pub async fn session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.router.session(&session_id).await {
        Ok(session) => Json(ApiResponse::ok(session)).into_response(),
        Err(e) => failure(&e),
    }
}
