//! Downstream channel integrations.
//!
//! Three independent, individually optional adapters share one capability
//! set: Chatwoot (CRM system of record and transcript owner), the
//! automation webhook (AI pipeline ingress), and HighLevel (legacy CRM
//! fallback). An adapter without credentials comes up disabled and is
//! skipped, never queued. A failing adapter is logged and contained; it
//! must not abort the other adapters or the client acknowledgment.

pub mod adapter;
pub mod automation;
pub mod chatwoot;
pub mod error;
pub mod highlevel;

pub use {
    adapter::{
        ChannelAdapter, ContactProfile, CrmBinding, CrmChannel, MessageDirection, SessionBinding,
    },
    automation::AutomationAdapter,
    chatwoot::{ChatwootAdapter, Contact, Conversation},
    error::{Error, Result},
    highlevel::HighLevelAdapter,
};
