//! Live websocket connection registry.
//!
//! One entry per accepted connection, holding the write half of its
//! outbound queue. A connection is accepted first (capacity gated) and
//! bound to a session later when the client joins; multiple concurrent
//! connections may bind the same session and all of them receive that
//! session's broadcasts.

use std::collections::HashSet;

use {dashmap::DashMap, tokio::sync::mpsc, tracing::debug};

use crate::{
    error::{Error, Result},
    events::EventFrame,
};

struct ConnectionEntry {
    session_id: Option<String>,
    sender: mpsc::UnboundedSender<String>,
}

pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionEntry>,
    max_connections: usize,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_connections,
        }
    }

    /// Reserve a slot for a new connection. Refused connections never
    /// occupy a slot. Re-registering a live connection id is a no-op.
    pub fn register(
        &self,
        connection_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        if self.connections.contains_key(connection_id) {
            return Ok(());
        }
        if self.connections.len() >= self.max_connections {
            return Err(Error::CapacityExceeded {
                max: self.max_connections,
            });
        }
        self.connections.insert(
            connection_id.to_string(),
            ConnectionEntry {
                session_id: None,
                sender,
            },
        );
        debug!(connection_id, total = self.connections.len(), "connection registered");
        Ok(())
    }

    /// Bind a connection to its session. A connection keeps one session
    /// for its whole lifetime; binding the same session again is a no-op.
    pub fn bind(&self, connection_id: &str, session_id: &str) -> Result<()> {
        let Some(mut entry) = self.connections.get_mut(connection_id) else {
            return Err(Error::validation("unknown connection"));
        };
        match entry.session_id.as_deref() {
            None => {
                entry.session_id = Some(session_id.to_string());
                Ok(())
            },
            Some(bound) if bound == session_id => Ok(()),
            Some(_) => Err(Error::validation("connection already joined a session")),
        }
    }

    pub fn unregister(&self, connection_id: &str) {
        if self.connections.remove(connection_id).is_some() {
            debug!(connection_id, total = self.connections.len(), "connection removed");
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Connection ids currently bound to a session.
    #[must_use]
    pub fn connections_for(&self, session_id: &str) -> Vec<String> {
        self.connections
            .iter()
            .filter(|entry| entry.session_id.as_deref() == Some(session_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Distinct session ids with at least one live bound connection.
    #[must_use]
    pub fn active_sessions(&self) -> HashSet<String> {
        self.connections
            .iter()
            .filter_map(|entry| entry.session_id.clone())
            .collect()
    }

    /// Deliver a frame to one connection. Returns false when the
    /// connection is gone or its queue has closed.
    pub fn send_to(&self, connection_id: &str, frame: &EventFrame) -> bool {
        let Some(entry) = self.connections.get(connection_id) else {
            return false;
        };
        entry.sender.send(frame.to_wire()).is_ok()
    }

    /// Fan a frame out to every connection bound to a session. Returns
    /// the number of connections that accepted delivery; connections with
    /// closed queues are dropped from the registry.
    pub fn broadcast_to_session(&self, session_id: &str, frame: &EventFrame) -> usize {
        let wire = frame.to_wire();
        let mut delivered = 0usize;
        let mut dead = Vec::new();
        for entry in &self.connections {
            if entry.session_id.as_deref() != Some(session_id) {
                continue;
            }
            if entry.sender.send(wire.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(entry.key().clone());
            }
        }
        for connection_id in dead {
            self.unregister(&connection_id);
        }
        delivered
    }
}
