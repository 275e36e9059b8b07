//! WebSocket connection lifecycle: accept (capacity gated), join, message
//! loop, cleanup.
//!
//! Each connection owns an unbounded outbound queue; a spawned write loop
//! drains it into the socket so broadcasts from other tasks never block on
//! a slow client.

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    serde::Deserialize,
    tokio::sync::mpsc,
    tracing::{debug, info},
};

use {
    crate::state::AppState,
    parlor_common::InboundMessage,
    parlor_router::{ConnectionRegistry, EventFrame},
};

/// Client-to-server frames. Everything else on the wire is refused with an
/// `INVALID_MESSAGE` error frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "lowercase")]
enum ClientFrame {
    Join {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Message(InboundMessage),
}

/// Drive a single connection from accept to close.
pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    let registry = state.router.registry().clone();
    if let Err(e) = registry.register(&connection_id, client_tx) {
        // Over the ceiling: the client gets an explicit refusal, never a
        // silent drop, and the slot count stays untouched.
        info!(connection_id = %connection_id, "ws: connection refused, at capacity");
        let refusal = EventFrame::error(e.code(), &e.to_string()).to_wire();
        let _ = ws_tx.send(Message::Text(refusal.into())).await;
        let _ = ws_tx.close().await;
        return;
    }
    info!(connection_id = %connection_id, total = registry.count(), "ws: connection accepted");

    let write_connection_id = connection_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(text) = client_rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                debug!(connection_id = %write_connection_id, "ws: write loop closed");
                break;
            }
        }
    });

    registry.send_to(&connection_id, &EventFrame::connection_status(true));

    while let Some(message) = ws_rx.next().await {
        let Ok(message) = message else {
            break;
        };
        match message {
            Message::Text(text) => {
                handle_frame(&state, &registry, &connection_id, text.as_str()).await;
            },
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            _ => {},
        }
    }

    registry.unregister(&connection_id);
    write_handle.abort();
    info!(connection_id = %connection_id, total = registry.count(), "ws: connection closed");
}

async fn handle_frame(
    state: &AppState,
    registry: &ConnectionRegistry,
    connection_id: &str,
    text: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(connection_id = %connection_id, error = %e, "ws: unrecognized frame");
            registry.send_to(
                connection_id,
                &EventFrame::error("INVALID_MESSAGE", "unrecognized frame"),
            );
            return;
        },
    };

    match frame {
        ClientFrame::Join { session_id } => {
            match state.router.handle_join(connection_id, &session_id).await {
                Ok(()) => {
                    registry.send_to(connection_id, &EventFrame::connection_status(true));
                },
                Err(e) => {
                    registry.send_to(connection_id, &EventFrame::error(e.code(), &e.to_string()));
                },
            }
        },
        ClientFrame::Message(message) => {
            match state.router.handle_inbound(connection_id, &message).await {
                Ok(ack) => {
                    registry.send_to(connection_id, &EventFrame {
                        event: "message-ack",
                        payload: serde_json::to_value(&ack).ok(),
                    });
                },
                Err(e) => {
                    registry.send_to(connection_id, &EventFrame::error(e.code(), &e.to_string()));
                },
            }
        },
    }
}
