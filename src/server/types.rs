//! Wire types for the HTTP API and both websocket endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::{Event, EventKind};
use crate::extract::Role;
use crate::history::HistoryEntry;

// ---- phone client websocket ------------------------------------------------

/// Frames a phone client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    SendMessage { text: String },
}

/// Frames the server sends to phone clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status {
        message: String,
        level: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    ChatUpdate {
        messages: Vec<ChatMessage>,
        partial: bool,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_session: Option<String>,
    },
    ChatComplete {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        html: Option<String>,
        format: String,
        role: Role,
        timestamp: DateTime<Utc>,
        source: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ServerMessage {
    /// Translate a bus event into its wire form.
    pub fn from_event(event: &Event) -> Self {
        match event.kind {
            EventKind::Status => ServerMessage::Status {
                message: event.text.clone(),
                level: event.level.clone().unwrap_or_else(|| "info".to_string()),
                session_id: event.source_session.clone(),
            },
            EventKind::PartialUpdate => ServerMessage::ChatUpdate {
                messages: vec![ChatMessage {
                    role: event.role,
                    text: event.text.clone(),
                }],
                partial: true,
                timestamp: event.timestamp,
                source_session: event.source_session.clone(),
            },
            EventKind::UserEcho => ServerMessage::ChatUpdate {
                messages: vec![ChatMessage {
                    role: event.role,
                    text: event.text.clone(),
                }],
                partial: false,
                timestamp: event.timestamp,
                source_session: event.source_session.clone(),
            },
            EventKind::Completed => ServerMessage::ChatComplete {
                content: event.text.clone(),
                html: event.html.clone(),
                format: if event.html.is_some() {
                    "html".to_string()
                } else {
                    "markdown".to_string()
                },
                role: event.role,
                timestamp: event.timestamp,
                source: "live".to_string(),
            },
        }
    }

    /// Replayed history entries use the same completed-message shape, tagged
    /// so clients can render them without animation.
    pub fn from_history(entry: &HistoryEntry) -> Self {
        ServerMessage::ChatComplete {
            content: entry.text.clone(),
            html: entry.html.clone(),
            format: entry.format.clone(),
            role: entry.role,
            timestamp: entry.timestamp,
            source: "history".to_string(),
        }
    }
}

// ---- desktop bridge websocket ----------------------------------------------

/// Frames the desktop bridge process may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeClientMessage {
    BridgeRegister {
        #[serde(default)]
        source: Option<String>,
    },
    AiMessages {
        messages: Vec<BridgeCandidate>,
    },
}

/// One extraction candidate as reported by the desktop bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeCandidate {
    pub text: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub origin_id: Option<String>,
}

/// Frames the server sends to the desktop bridge.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeServerMessage {
    BridgeRegistered,
    InjectMessage { text: String },
}

// ---- HTTP API --------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Opaque caller-chosen workspace label, stored on the session as-is.
    #[serde(default)]
    pub workspace: Option<String>,
    /// Requested session id; reusing a known id reclaims that session.
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub websocket_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub sessions: usize,
    pub source_attached: bool,
    pub polling: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_parses_tagged_json() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"send_message","text":"hi"}"#).unwrap();
        match msg {
            ClientMessage::SendMessage { text } => assert_eq!(text, "hi"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn completed_event_serializes_as_chat_complete() {
        let event = Event::completed("done", Some("<p>done</p>".into()));
        let json = serde_json::to_value(ServerMessage::from_event(&event)).unwrap();
        assert_eq!(json["type"], "chat_complete");
        assert_eq!(json["content"], "done");
        assert_eq!(json["format"], "html");
        assert_eq!(json["source"], "live");
        assert_eq!(json["role"], "assistant");
    }

    #[test]
    fn partial_event_serializes_as_chat_update() {
        let event = Event::partial("so far");
        let json = serde_json::to_value(ServerMessage::from_event(&event)).unwrap();
        assert_eq!(json["type"], "chat_update");
        assert_eq!(json["partial"], true);
        assert_eq!(json["messages"][0]["text"], "so far");
    }

    #[test]
    fn history_entries_tag_source_history() {
        let entry = HistoryEntry::user("earlier question");
        let json = serde_json::to_value(ServerMessage::from_history(&entry)).unwrap();
        assert_eq!(json["type"], "chat_complete");
        assert_eq!(json["source"], "history");
        assert_eq!(json["role"], "user");
        assert!(json.get("html").is_none());
    }

    #[test]
    fn bridge_register_allows_missing_source() {
        let msg: BridgeClientMessage =
            serde_json::from_str(r#"{"type":"bridge_register"}"#).unwrap();
        assert!(matches!(
            msg,
            BridgeClientMessage::BridgeRegister { source: None }
        ));
    }

    #[test]
    fn ai_messages_parse_with_optional_fields() {
        let msg: BridgeClientMessage = serde_json::from_str(
            r#"{"type":"ai_messages","messages":[{"text":"hello","origin_id":"msg-3"}]}"#,
        )
        .unwrap();
        match msg {
            BridgeClientMessage::AiMessages { messages } => {
                assert_eq!(messages[0].text, "hello");
                assert_eq!(messages[0].origin_id.as_deref(), Some("msg-3"));
                assert!(messages[0].role.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
