//! Session registry and fan-out bus.
//!
//! Sessions are lightweight identifiers; the conversation itself is a single
//! shared stream, so completed messages broadcast to every connection on
//! every session. Each websocket connection registers an unbounded queue
//! here and drains it from its own write task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::error::{BridgeError, Result};
use crate::extract::Role;

/// What a bus event represents, mirrored into the wire `type` field by the
/// websocket layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Stream grew; carries the consolidated buffer so far.
    PartialUpdate,
    /// Stream settled; the final consolidated message.
    Completed,
    /// A client's own outbound message, echoed to all connections.
    UserEcho,
    /// Operational notice (attach/detach, injection failures).
    Status,
}

/// One event on the bus. Not all fields are meaningful for every kind;
/// `Status` uses `text` as the human-readable message and `level` for
/// severity, content events use `role`/`html`.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub role: Role,
    pub text: String,
    pub html: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Session whose activity produced this event, when attributable.
    pub source_session: Option<String>,
    pub level: Option<String>,
}

impl Event {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            kind: EventKind::PartialUpdate,
            role: Role::Assistant,
            text: text.into(),
            html: None,
            timestamp: Utc::now(),
            source_session: None,
            level: None,
        }
    }

    pub fn completed(text: impl Into<String>, html: Option<String>) -> Self {
        Self {
            kind: EventKind::Completed,
            role: Role::Assistant,
            text: text.into(),
            html,
            timestamp: Utc::now(),
            source_session: None,
            level: None,
        }
    }

    pub fn user_echo(text: impl Into<String>, source_session: impl Into<String>) -> Self {
        Self {
            kind: EventKind::UserEcho,
            role: Role::User,
            text: text.into(),
            html: None,
            timestamp: Utc::now(),
            source_session: Some(source_session.into()),
            level: None,
        }
    }

    pub fn status(message: impl Into<String>, level: &str) -> Self {
        Self {
            kind: EventKind::Status,
            role: Role::Unknown,
            text: message.into(),
            html: None,
            timestamp: Utc::now(),
            source_session: None,
            level: Some(level.to_string()),
        }
    }
}

/// A subscribed websocket connection's send half.
#[derive(Debug)]
struct Connection {
    id: Uuid,
    tx: UnboundedSender<Event>,
}

/// One registered session and its live connections.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    /// Opaque workspace identifier supplied at bootstrap, if any.
    pub workspace: Option<String>,
    pub created_at: DateTime<Utc>,
    connections: RwLock<Vec<Connection>>,
}

impl Session {
    fn new(id: String, workspace: Option<String>) -> Self {
        Self {
            id,
            workspace,
            created_at: Utc::now(),
            connections: RwLock::new(Vec::new()),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Deliver to every live connection, dropping senders whose receivers
    /// are gone. Returns how many connections received the event.
    fn deliver(&self, event: &Event) -> usize {
        let mut connections = self.connections.write();
        connections.retain(|conn| conn.tx.send(event.clone()).is_ok());
        connections.len()
    }
}

/// Registry of active sessions, keyed by caller-supplied or generated id.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    /// Register a session under `id`, generating one when absent.
    /// Re-registering an existing id returns the existing session so a
    /// reconnecting client keeps its identity.
    pub fn create(&self, id: Option<String>, workspace: Option<String>) -> Result<Arc<Session>> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Some(existing) = self.sessions.get(&id) {
            return Ok(existing.clone());
        }
        if self.sessions.len() >= self.max_sessions {
            return Err(BridgeError::Config(format!(
                "session limit reached ({})",
                self.max_sessions
            )));
        }
        let session = Arc::new(Session::new(id.clone(), workspace));
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Attach a connection queue to a session. The returned receiver is the
    /// connection's private event stream; dropping it unsubscribes lazily
    /// (the dead sender is pruned on the next delivery).
    pub fn subscribe(&self, session_id: &str) -> Result<(Uuid, UnboundedReceiver<Event>)> {
        let session = self
            .get(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        session.connections.write().push(Connection { id, tx });
        Ok((id, rx))
    }

    pub fn unsubscribe(&self, session_id: &str, connection_id: Uuid) {
        if let Some(session) = self.get(session_id) {
            session.connections.write().retain(|c| c.id != connection_id);
        }
    }

    /// Publish to one session's connections. Zero live connections is a
    /// success, not an error; unknown session is an error.
    pub fn publish(&self, session_id: &str, event: &Event) -> Result<usize> {
        let session = self
            .get(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
        Ok(session.deliver(event))
    }

    /// Publish to every connection on every session. The conversation is a
    /// single shared stream; all phones see the same content.
    pub fn broadcast_all(&self, event: &Event) -> usize {
        self.sessions
            .iter()
            .map(|entry| entry.deliver(event))
            .sum()
    }
}
