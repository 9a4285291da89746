use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use conduit_core::ids::{ConnectionId, SessionId};

/// Close code sent to a connection replaced by a newer one.
pub const SUPERSEDED_CODE: u16 = 1000;
pub const SUPERSEDED_REASON: &str = "New connection";

/// A frame queued for a connection's writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    NoConnection,
    /// The queue was full and the message was dropped.
    QueueFull,
    /// The connection's writer is gone.
    Closed(ConnectionId),
}

struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
}

/// At most one live connection per session.
pub struct ConnectionRegistry {
    connections: DashMap<SessionId, ConnectionHandle>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Register a connection for `session_id`, closing any previous one.
    /// Returns the new connection's id and the queue its writer drains.
    pub fn register(&self, session_id: &SessionId) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let previous = self.connections.insert(
            session_id.clone(),
            ConnectionHandle { id: id.clone(), tx },
        );

        if let Some(old) = previous {
            info!(
                session_id = %session_id,
                old_connection = %old.id,
                new_connection = %id,
                "connection superseded"
            );
            let _ = old.tx.try_send(Outbound::Close {
                code: SUPERSEDED_CODE,
                reason: SUPERSEDED_REASON.to_string(),
            });
        }
        (id, rx)
    }

    /// Remove the session's connection only if it is still `connection_id`.
    pub fn unregister_if(&self, session_id: &SessionId, connection_id: &ConnectionId) -> bool {
        self.connections
            .remove_if(session_id, |_, handle| handle.id == *connection_id)
            .is_some()
    }

    pub fn connection_id(&self, session_id: &SessionId) -> Option<ConnectionId> {
        self.connections.get(session_id).map(|h| h.id.clone())
    }

    pub fn send(&self, session_id: &SessionId, text: String) -> SendOutcome {
        let Some(handle) = self.connections.get(session_id) else {
            return SendOutcome::NoConnection;
        };
        match handle.tx.try_send(Outbound::Text(text)) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    session_id = %session_id,
                    connection = %handle.id,
                    "send queue full, dropping message"
                );
                SendOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed(handle.id.clone()),
        }
    }

    /// Queue `text`, waiting for room rather than dropping it. Never
    /// returns `QueueFull`.
    pub async fn deliver(&self, session_id: &SessionId, text: String) -> SendOutcome {
        let Some((id, tx)) = self
            .connections
            .get(session_id)
            .map(|h| (h.id.clone(), h.tx.clone()))
        else {
            return SendOutcome::NoConnection;
        };
        match tx.send(Outbound::Text(text)).await {
            Ok(()) => SendOutcome::Sent,
            Err(_) => SendOutcome::Closed(id),
        }
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }
}
