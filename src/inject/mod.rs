//! Outbound injection: delivering a phone-authored message into the desktop
//! chat input.
//!
//! Injection mechanisms vary by what is available at runtime, so sinks are
//! tried in priority order and the first success wins. Every attempt is
//! bounded by a timeout so a wedged mechanism cannot stall the chain.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{BridgeError, Result};

/// One way of getting text into the desktop chat input.
#[async_trait]
pub trait InjectionSink: Send + Sync {
    /// Short identifier for logs and the delivery report.
    fn name(&self) -> &str;

    /// Whether the sink is currently worth trying. Chains skip unavailable
    /// sinks without burning their timeout.
    fn is_available(&self) -> bool {
        true
    }

    async fn inject(&self, text: &str) -> Result<()>;
}

/// Result of a successful chain traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectOutcome {
    pub method_used: String,
}

/// Ordered sink chain. Earlier sinks are preferred; later ones are
/// fallbacks.
pub struct SinkChain {
    sinks: Vec<Arc<dyn InjectionSink>>,
    timeout: Duration,
}

impl SinkChain {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sinks: Vec::new(),
            timeout,
        }
    }

    pub fn push(&mut self, sink: Arc<dyn InjectionSink>) {
        self.sinks.push(sink);
    }

    pub fn with_sink(mut self, sink: Arc<dyn InjectionSink>) -> Self {
        self.push(sink);
        self
    }

    /// Try each available sink in order until one succeeds. Fails only when
    /// every sink has failed or timed out.
    pub async fn inject(&self, text: &str) -> Result<InjectOutcome> {
        let mut last_failure = String::from("no injection sinks configured");

        for sink in &self.sinks {
            if !sink.is_available() {
                tracing::debug!(sink = sink.name(), "skipping unavailable sink");
                continue;
            }

            match tokio::time::timeout(self.timeout, sink.inject(text)).await {
                Ok(Ok(())) => {
                    tracing::info!(sink = sink.name(), "message injected");
                    return Ok(InjectOutcome {
                        method_used: sink.name().to_string(),
                    });
                }
                Ok(Err(err)) => {
                    tracing::warn!(sink = sink.name(), %err, "injection sink failed");
                    last_failure = format!("{}: {err}", sink.name());
                }
                Err(_) => {
                    tracing::warn!(
                        sink = sink.name(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "injection sink timed out"
                    );
                    last_failure = format!("{}: timed out", sink.name());
                }
            }
        }

        Err(BridgeError::InjectionFailed(last_failure))
    }
}

/// Primary sink: the registered desktop bridge socket. Messages are queued
/// onto the bridge connection's write task; availability tracks whether a
/// bridge is currently registered.
#[derive(Default)]
pub struct SocketSink {
    tx: Mutex<Option<UnboundedSender<String>>>,
}

impl SocketSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a desktop bridge registers.
    pub fn bind(&self, tx: UnboundedSender<String>) {
        *self.tx.lock() = Some(tx);
    }

    /// Called when the bridge connection closes.
    pub fn unbind(&self) {
        *self.tx.lock() = None;
    }
}

#[async_trait]
impl InjectionSink for SocketSink {
    fn name(&self) -> &str {
        "bridge-socket"
    }

    fn is_available(&self) -> bool {
        self.tx.lock().is_some()
    }

    async fn inject(&self, text: &str) -> Result<()> {
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => tx
                .send(text.to_string())
                .map_err(|_| BridgeError::TransportClosed),
            None => Err(BridgeError::InjectionFailed(
                "no bridge registered".into(),
            )),
        }
    }
}

/// Fallback sink: pipe the text to a configured external command's stdin.
/// Disabled when no command is configured.
pub struct CommandSink {
    command: String,
    args: Vec<String>,
}

impl CommandSink {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl InjectionSink for CommandSink {
    fn name(&self) -> &str {
        "command"
    }

    fn is_available(&self) -> bool {
        !self.command.is_empty()
    }

    async fn inject(&self, text: &str) -> Result<()> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                BridgeError::InjectionFailed(format!("spawn {}: {err}", self.command))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(BridgeError::InjectionFailed(format!(
                "{} exited with {status}",
                self.command
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSink {
        label: &'static str,
        ok: bool,
        calls: AtomicUsize,
    }

    impl FixedSink {
        fn new(label: &'static str, ok: bool) -> Arc<Self> {
            Arc::new(Self {
                label,
                ok,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl InjectionSink for FixedSink {
        fn name(&self) -> &str {
            self.label
        }

        async fn inject(&self, _text: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ok {
                Ok(())
            } else {
                Err(BridgeError::InjectionFailed("nope".into()))
            }
        }
    }

    struct StallSink;

    #[async_trait]
    impl InjectionSink for StallSink {
        fn name(&self) -> &str {
            "stall"
        }

        async fn inject(&self, _text: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let first = FixedSink::new("first", true);
        let second = FixedSink::new("second", true);
        let chain = SinkChain::new(Duration::from_secs(1))
            .with_sink(first.clone())
            .with_sink(second.clone());

        let outcome = chain.inject("hello").await.unwrap();
        assert_eq!(outcome.method_used, "first");
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_falls_through_to_next_sink() {
        let broken = FixedSink::new("broken", false);
        let working = FixedSink::new("working", true);
        let chain = SinkChain::new(Duration::from_secs(1))
            .with_sink(broken)
            .with_sink(working);

        let outcome = chain.inject("hello").await.unwrap();
        assert_eq!(outcome.method_used, "working");
    }

    #[tokio::test]
    async fn all_failures_report_last_error() {
        let chain = SinkChain::new(Duration::from_secs(1))
            .with_sink(FixedSink::new("a", false))
            .with_sink(FixedSink::new("b", false));

        let err = chain.inject("hello").await.unwrap_err();
        match err {
            BridgeError::InjectionFailed(msg) => assert!(msg.starts_with("b:")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_sink_times_out_and_falls_through() {
        let working = FixedSink::new("working", true);
        let chain = SinkChain::new(Duration::from_millis(100))
            .with_sink(Arc::new(StallSink))
            .with_sink(working);

        let outcome = chain.inject("hello").await.unwrap();
        assert_eq!(outcome.method_used, "working");
    }

    #[tokio::test]
    async fn empty_chain_fails() {
        let chain = SinkChain::new(Duration::from_secs(1));
        assert!(chain.inject("hello").await.is_err());
    }

    #[tokio::test]
    async fn socket_sink_unavailable_until_bound() {
        let sink = SocketSink::new();
        assert!(!sink.is_available());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        sink.bind(tx);
        assert!(sink.is_available());

        sink.inject("queued text").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "queued text");

        sink.unbind();
        assert!(!sink.is_available());
    }

    #[tokio::test]
    async fn socket_sink_fails_when_receiver_dropped() {
        let sink = SocketSink::new();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        sink.bind(tx);
        drop(rx);

        assert!(sink.inject("lost").await.is_err());
    }

    #[test]
    fn command_sink_unavailable_without_command() {
        let sink = CommandSink::new("", Vec::new());
        assert!(!sink.is_available());
    }

    #[tokio::test]
    async fn command_sink_runs_configured_command() {
        let sink = CommandSink::new("cat", Vec::new());
        sink.inject("piped through").await.unwrap();
    }

    #[tokio::test]
    async fn command_sink_surfaces_nonzero_exit() {
        let sink = CommandSink::new("false", Vec::new());
        assert!(sink.inject("ignored").await.is_err());
    }
}
