//! Reconnecting websocket client.
//!
//! The embeddable counterpart of the server's `/ws/{session_id}` endpoint:
//! maintains the connection, sends application-level heartbeats, surfaces
//! server frames as events, and retries with exponential backoff when the
//! link drops. Useful for headless consumers and integration tests; the
//! phone browser runs its own equivalent.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::settings::{HeartbeatSettings, ReconnectSettings};

/// Pure backoff schedule: `base * 2^(attempt-1)` capped at `cap`, giving up
/// after `max_attempts`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.base_ms),
            Duration::from_millis(settings.cap_ms),
            settings.max_attempts,
        )
    }

    /// Delay before reconnect attempt `attempt` (1-based), or `None` once
    /// the attempt budget is spent.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self
            .base
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.cap);
        Some(delay)
    }
}

/// Connection lifecycle, as observed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Closed,
}

/// Events surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    /// A parsed JSON frame from the server.
    Frame(Value),
    /// Heartbeat reply received.
    Pong,
}

/// Commands the embedding application can issue.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    SendMessage(String),
    Close,
}

/// Handle to a running client task.
pub struct RemoteClient {
    pub events: UnboundedReceiver<ClientEvent>,
    pub commands: UnboundedSender<ClientCommand>,
    cancel: CancellationToken,
}

impl RemoteClient {
    /// Spawn the connection loop against `url`. The task runs until the
    /// attempt budget is spent, `Close` is issued, or `shutdown` fires.
    pub fn spawn(
        url: String,
        policy: ReconnectPolicy,
        heartbeat: HeartbeatSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = shutdown.clone();

        tokio::spawn(run_loop(url, policy, heartbeat, event_tx, command_rx, shutdown));

        Self {
            events,
            commands,
            cancel,
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn run_loop(
    url: String,
    policy: ReconnectPolicy,
    heartbeat: HeartbeatSettings,
    events: UnboundedSender<ClientEvent>,
    mut commands: UnboundedReceiver<ClientCommand>,
    shutdown: CancellationToken,
) {
    let mut attempt = 0u32;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let _ = events.send(ClientEvent::StateChanged(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting { attempt }
        }));

        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                attempt = 0;
                let _ = events.send(ClientEvent::StateChanged(ConnectionState::Connected));
                tracing::info!(%url, "connected");

                let closed_by_us =
                    drive_connection(stream, &heartbeat, &events, &mut commands, &shutdown).await;
                if closed_by_us {
                    break;
                }
                tracing::warn!(%url, "connection lost");
            }
            Err(err) => {
                tracing::warn!(%url, %err, "connect failed");
            }
        }

        attempt += 1;
        let Some(delay) = policy.delay(attempt) else {
            tracing::error!(%url, attempts = attempt - 1, "reconnect budget exhausted");
            break;
        };
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }
    }

    let _ = events.send(ClientEvent::StateChanged(ConnectionState::Closed));
}

/// Pump one live connection. Returns true when the close was deliberate
/// (Close command or shutdown) rather than a link failure.
async fn drive_connection(
    mut stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    heartbeat: &HeartbeatSettings,
    events: &UnboundedSender<ClientEvent>,
    commands: &mut UnboundedReceiver<ClientCommand>,
    shutdown: &CancellationToken,
) -> bool {
    let mut ping = tokio::time::interval(Duration::from_secs(heartbeat.interval_secs));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = stream.send(Message::Close(None)).await;
                return true;
            }
            _ = ping.tick() => {
                let frame = serde_json::json!({ "type": "ping" }).to_string();
                if stream.send(Message::Text(frame.into())).await.is_err() {
                    return false;
                }
            }
            command = commands.recv() => {
                match command {
                    Some(ClientCommand::SendMessage(text)) => {
                        let frame = serde_json::json!({
                            "type": "send_message",
                            "text": text,
                        })
                        .to_string();
                        if stream.send(Message::Text(frame.into())).await.is_err() {
                            return false;
                        }
                    }
                    Some(ClientCommand::Close) | None => {
                        let _ = stream.send(Message::Close(None)).await;
                        return true;
                    }
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "pong" {
                            let _ = events.send(ClientEvent::Pong);
                            continue;
                        }
                        match serde_json::from_str::<Value>(text.as_str()) {
                            Ok(value) => {
                                if value.get("type").and_then(Value::as_str) == Some("pong") {
                                    let _ = events.send(ClientEvent::Pong);
                                } else {
                                    let _ = events.send(ClientEvent::Frame(value));
                                }
                            }
                            Err(err) => {
                                tracing::debug!(%err, "ignoring non-JSON text frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return false,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(%err, "websocket read error");
                        return false;
                    }
                }
            }
        }
    }
}

/// Parse a ws/wss URL for a session endpoint, primarily to fail fast on
/// misconfiguration before the first connect attempt.
pub fn session_url(base: &str, session_id: &str) -> Result<String> {
    if !base.starts_with("ws://") && !base.starts_with("wss://") {
        return Err(BridgeError::Config(format!(
            "websocket url must start with ws:// or wss://: {base}"
        )));
    }
    Ok(format!("{}/ws/{}", base.trim_end_matches('/'), session_id))
}
