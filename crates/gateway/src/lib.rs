//! HTTP and WebSocket gateway for the chat router.
//!
//! Owns transport only: websocket upgrades, the HTTP API surface, webhook
//! authentication, and CORS. Routing decisions live in `parlor-router`.

pub mod auth;
pub mod routes;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    server::{build_app, build_state, serve},
    state::AppState,
};
