//! Websocket endpoints: `/ws/{session_id}` for phone clients and
//! `/ws/bridge` for the desktop bridge process.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::stream::StreamExt;
use futures::SinkExt;
use tokio::sync::mpsc;

use super::types::{
    BridgeClientMessage, BridgeServerMessage, ClientMessage, ServerMessage,
};
use super::AppState;
use crate::bus::Event;
use crate::extract::{Candidate, Role};

// ---- phone client ----------------------------------------------------------

pub async fn client_ws(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client(socket, session_id, state))
}

async fn handle_client(socket: WebSocket, session_id: String, state: AppState) {
    // Sessions are bootstrapped over POST /api/session; a websocket for an
    // unknown id is refused, not registered on the fly.
    let (connection_id, mut bus_rx) = match state.bridge.registry().subscribe(&session_id) {
        Ok(sub) => sub,
        Err(err) => {
            tracing::warn!(%session_id, %err, "rejecting connection");
            let _ = send_frame(
                socket,
                &ServerMessage::Status {
                    message: err.to_string(),
                    level: "error".to_string(),
                    session_id: Some(session_id),
                },
            )
            .await;
            return;
        }
    };
    tracing::info!(%session_id, %connection_id, "client connected");

    let (mut sink, mut reader) = socket.split();
    // Direct frames (pong, per-connection status, history replay) bypass the
    // bus so they reach only this connection. Pre-serialized so the pong can
    // stay a bare text frame.
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<String>();

    send_direct(
        &direct_tx,
        &ServerMessage::Status {
            message: "connected".to_string(),
            level: "info".to_string(),
            session_id: Some(session_id.clone()),
        },
    );

    if !state.bridge.source_attached() {
        send_direct(
            &direct_tx,
            &ServerMessage::Status {
                message: "desktop bridge not connected".to_string(),
                level: "warning".to_string(),
                session_id: Some(session_id.clone()),
            },
        );
    }

    match state.bridge.history().recent(state.replay_limit).await {
        Ok(entries) => {
            for entry in &entries {
                send_direct(&direct_tx, &ServerMessage::from_history(entry));
            }
        }
        Err(err) => tracing::warn!(%err, "history replay failed"),
    }

    state.bridge.start_polling();

    let write_task = tokio::spawn(async move {
        while let Some(json) = next_outbound(&mut bus_rx, &mut direct_rx).await {
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Ping) => {
                // Bare text, not a JSON envelope; clients key on it.
                let _ = direct_tx.send("pong".to_string());
            }
            Ok(ClientMessage::SendMessage { text }) => {
                if let Err(err) = state.bridge.handle_send(&session_id, &text).await {
                    tracing::warn!(%session_id, %err, "send failed");
                    send_direct(
                        &direct_tx,
                        &ServerMessage::Status {
                            message: format!("delivery failed: {err}"),
                            level: "error".to_string(),
                            session_id: Some(session_id.clone()),
                        },
                    );
                }
            }
            Err(err) => {
                // Malformed input never tears the connection down.
                tracing::warn!(%session_id, %err, "ignoring malformed frame");
            }
        }
    }

    state.bridge.registry().unsubscribe(&session_id, connection_id);
    write_task.abort();
    tracing::info!(%session_id, %connection_id, "client disconnected");
}

/// Next frame to write. Direct frames (welcome, replay, pong) drain ahead of
/// bus events so a reconnecting client never sees live traffic interleaved
/// with its history replay.
async fn next_outbound(
    bus_rx: &mut mpsc::UnboundedReceiver<Event>,
    direct_rx: &mut mpsc::UnboundedReceiver<String>,
) -> Option<String> {
    loop {
        tokio::select! {
            biased;
            direct = direct_rx.recv() => return direct,
            event = bus_rx.recv() => {
                let event = event?;
                match serde_json::to_string(&ServerMessage::from_event(&event)) {
                    Ok(json) => return Some(json),
                    Err(_) => continue,
                }
            }
        }
    }
}

fn send_direct(tx: &mpsc::UnboundedSender<String>, message: &ServerMessage) {
    if let Ok(json) = serde_json::to_string(message) {
        let _ = tx.send(json);
    }
}

async fn send_frame(mut socket: WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).unwrap_or_default();
    socket.send(Message::Text(json.into())).await
}

// ---- desktop bridge --------------------------------------------------------

pub async fn bridge_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_bridge(socket, state))
}

async fn handle_bridge(socket: WebSocket, state: AppState) {
    let (mut sink, mut reader) = socket.split();
    let mut registered = false;

    let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<String>();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<BridgeServerMessage>();

    let write_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                text = inject_rx.recv() => match text {
                    Some(text) => BridgeServerMessage::InjectMessage { text },
                    None => break,
                },
                frame = frame_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match serde_json::from_str::<BridgeClientMessage>(&text) {
            Ok(BridgeClientMessage::BridgeRegister { source }) => {
                tracing::info!(source = source.as_deref().unwrap_or("unknown"), "bridge registered");
                registered = true;
                state.source.attach();
                state.socket_sink.bind(inject_tx.clone());
                state.bridge.on_source_attached();
                // Consolidation must run even before the first phone client
                // connects, or queued messages never reach the history log.
                state.bridge.start_polling();
                let _ = frame_tx.send(BridgeServerMessage::BridgeRegistered);
            }
            Ok(BridgeClientMessage::AiMessages { messages }) => {
                if !registered {
                    tracing::warn!("dropping ai_messages from unregistered bridge");
                    continue;
                }
                let candidates: Vec<Candidate> = messages
                    .into_iter()
                    .map(|m| {
                        let mut candidate = Candidate::new(m.text)
                            .with_role(m.role.unwrap_or(Role::Assistant));
                        if let Some(html) = m.html {
                            candidate = candidate.with_html(html);
                        }
                        if let Some(origin) = m.origin_id {
                            candidate = candidate.with_origin(origin);
                        }
                        candidate
                    })
                    .collect();
                state.source.push(candidates);
            }
            Err(err) => {
                tracing::warn!(%err, "ignoring malformed bridge frame");
            }
        }
    }

    write_task.abort();
    if registered {
        state.socket_sink.unbind();
        state.source.detach();
        if let Err(err) = state.bridge.on_source_lost().await {
            tracing::warn!(%err, "source-lost handling failed");
        }
    }
    tracing::info!("bridge disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ChatBridge;
    use crate::bus::SessionRegistry;
    use crate::extract::{NoiseClassifier, QueueSource};
    use crate::history::HistoryLog;
    use crate::inject::{SinkChain, SocketSink};
    use crate::settings::BridgeSettings;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn serve() -> (TempDir, AppState, SocketAddr) {
        let dir = TempDir::new().unwrap();
        let settings = BridgeSettings::default();
        let source = Arc::new(QueueSource::new());
        let socket_sink = Arc::new(SocketSink::new());
        let injector = SinkChain::new(Duration::from_secs(1)).with_sink(socket_sink.clone());
        let registry = Arc::new(SessionRegistry::new(settings.server.max_sessions));
        let history = HistoryLog::open(dir.path()).await.unwrap();
        let bridge = Arc::new(ChatBridge::new(
            &settings,
            source.clone(),
            NoiseClassifier::default(),
            registry,
            history,
            injector,
        ));
        let state = AppState {
            bridge,
            source,
            socket_sink,
            replay_limit: settings.history.replay_limit,
            shutdown: CancellationToken::new(),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = super::super::create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (dir, state, addr)
    }

    async fn next_json(socket: &mut Client) -> serde_json::Value {
        loop {
            match socket.next().await.unwrap().unwrap() {
                tokio_tungstenite::tungstenite::Message::Text(text) => {
                    return serde_json::from_str(&text).unwrap();
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn direct_frames_drain_before_live_events() {
        let (bus_tx, mut bus_rx) = mpsc::unbounded_channel();
        let (direct_tx, mut direct_rx) = mpsc::unbounded_channel();

        // A completed event already waiting in the bus queue must not jump
        // ahead of queued replay frames.
        bus_tx.send(Event::completed("a live reply", None)).unwrap();
        direct_tx.send("replay-1".to_string()).unwrap();
        direct_tx.send("replay-2".to_string()).unwrap();

        let first = next_outbound(&mut bus_rx, &mut direct_rx).await.unwrap();
        let second = next_outbound(&mut bus_rx, &mut direct_rx).await.unwrap();
        let third = next_outbound(&mut bus_rx, &mut direct_rx).await.unwrap();

        assert_eq!(first, "replay-1");
        assert_eq!(second, "replay-2");
        assert!(third.contains("a live reply"));
    }

    #[tokio::test]
    async fn client_without_bridge_gets_a_warning_status() {
        let (_dir, state, addr) = serve().await;
        state
            .bridge
            .registry()
            .create(Some("s".into()), None)
            .unwrap();

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/s"))
            .await
            .unwrap();

        let connected = next_json(&mut socket).await;
        assert_eq!(connected["type"], "status");
        assert_eq!(connected["level"], "info");

        let warning = next_json(&mut socket).await;
        assert_eq!(warning["type"], "status");
        assert_eq!(warning["level"], "warning");
    }

    #[tokio::test]
    async fn bridge_registration_starts_consolidation() {
        let (_dir, state, addr) = serve().await;
        assert!(!state.bridge.is_polling());

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/bridge"))
            .await
            .unwrap();
        socket
            .send(tokio_tungstenite::tungstenite::Message::Text(
                r#"{"type":"bridge_register","source":"desktop"}"#.into(),
            ))
            .await
            .unwrap();

        let ack = next_json(&mut socket).await;
        assert_eq!(ack["type"], "bridge_registered");
        assert!(state.bridge.is_polling());
    }
}
