//! Routing core for the chat gateway.
//!
//! Ties the session store, the rate limiters, the connection registry,
//! and the channel adapters together. The gateway crate owns transport
//! (websocket upgrade, HTTP routes); everything that decides where a
//! message goes lives here.

pub mod crm_event;
pub mod error;
pub mod events;
pub mod rate_limit;
pub mod registry;
pub mod router;

pub use {
    crm_event::CrmEvent,
    error::{Error, RateLimitScope, Result},
    events::EventFrame,
    rate_limit::{Decision, FixedWindowLimiter},
    registry::ConnectionRegistry,
    router::{AdapterFlags, HealthSummary, InboundAck, ReplyReceipt, Router},
};
