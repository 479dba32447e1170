//! The polling pipeline: extraction source → noise filter → dedup →
//! stability engine → bus + history.
//!
//! One `ChatBridge` serves the whole process. Polling starts lazily with the
//! first websocket client and stops when the caller says so; the engine and
//! dedup window reset on stop so a later restart begins from a clean slate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bus::{Event, SessionRegistry};
use crate::engine::{EngineEvent, StabilityEngine};
use crate::error::Result;
use crate::extract::{Candidate, CandidateDeduper, ExtractionSource, NoiseClassifier};
use crate::history::{HistoryEntry, HistoryLog};
use crate::inject::SinkChain;
use crate::settings::BridgeSettings;

pub struct ChatBridge {
    source: Arc<dyn ExtractionSource>,
    classifier: NoiseClassifier,
    deduper: Mutex<CandidateDeduper>,
    engine: Mutex<StabilityEngine>,
    registry: Arc<SessionRegistry>,
    history: HistoryLog,
    injector: SinkChain,
    poll_interval: Duration,
    poll_task: Mutex<Option<CancellationToken>>,
    loss_announced: AtomicBool,
}

impl ChatBridge {
    pub fn new(
        settings: &BridgeSettings,
        source: Arc<dyn ExtractionSource>,
        classifier: NoiseClassifier,
        registry: Arc<SessionRegistry>,
        history: HistoryLog,
        injector: SinkChain,
    ) -> Self {
        Self {
            source,
            classifier,
            deduper: Mutex::new(CandidateDeduper::new(settings.polling.dedup_capacity)),
            engine: Mutex::new(StabilityEngine::new(
                settings.polling.stable_threshold,
                settings.polling.max_buffer_bytes,
            )),
            registry,
            history,
            injector,
            poll_interval: Duration::from_millis(settings.polling.interval_ms),
            poll_task: Mutex::new(None),
            loss_announced: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn source_attached(&self) -> bool {
        self.source.is_attached()
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task.lock().is_some()
    }

    /// Start the poll loop if it is not already running. Idempotent: a
    /// second client connecting while polling is live is a no-op.
    pub fn start_polling(self: &Arc<Self>) {
        let mut task = self.poll_task.lock();
        if task.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *task = Some(token.clone());
        drop(task);

        tracing::info!(interval_ms = self.poll_interval.as_millis() as u64, "polling started");
        let bridge = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(bridge.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(err) = bridge.tick().await {
                            tracing::warn!(%err, "poll tick failed");
                        }
                    }
                }
            }
            tracing::info!("polling stopped");
        });
    }

    /// Stop the loop and reset accumulation state. Nothing mid-stream is
    /// emitted; a stop is a deliberate reset, not a source loss.
    pub fn stop_polling(&self) {
        if let Some(token) = self.poll_task.lock().take() {
            token.cancel();
        }
        self.engine.lock().reset();
        self.deduper.lock().clear();
    }

    /// One pipeline pass. Also runs fine when called directly (tests,
    /// manual stepping) without the loop.
    pub async fn tick(&self) -> Result<()> {
        let raw = match self.source.poll().await {
            Ok(raw) => raw,
            Err(err) => {
                // Source dropped out from under us mid-stream.
                if self.engine.lock().is_streaming() {
                    tracing::warn!(%err, "source unavailable mid-stream, flushing");
                    self.on_source_lost().await?;
                }
                return Ok(());
            }
        };

        let fresh = self.filter(raw);
        let event = self.engine.lock().tick(&fresh);
        match event {
            Some(EngineEvent::Partial { text }) => {
                self.registry.broadcast_all(&Event::partial(text));
            }
            Some(EngineEvent::Completed { text, html }) => {
                self.publish_completed(text, html).await?;
            }
            None => {}
        }
        Ok(())
    }

    /// Noise classification then dedup, in that order: noisy text never
    /// enters the dedup window.
    fn filter(&self, raw: Vec<Candidate>) -> Vec<Candidate> {
        let mut deduper = self.deduper.lock();
        raw.into_iter()
            .filter(|c| {
                if self.classifier.is_noise(&c.text) {
                    tracing::trace!(text = %c.text, "dropped as noise");
                    return false;
                }
                deduper.check_and_remember(c)
            })
            .collect()
    }

    async fn publish_completed(&self, text: String, html: Option<String>) -> Result<()> {
        let entry = HistoryEntry::assistant(&text, html.clone());
        if let Err(err) = self.history.append(&entry).await {
            // Delivery still happens when the disk is unhappy.
            tracing::error!(%err, "failed to append history");
        }
        let delivered = self.registry.broadcast_all(&Event::completed(text, html));
        tracing::info!(delivered, "assistant message completed");
        Ok(())
    }

    /// A desktop bridge attached. The dedup window clears so content that
    /// was seen under the previous attachment can flow again.
    pub fn on_source_attached(&self) {
        self.deduper.lock().clear();
        self.loss_announced.store(false, Ordering::SeqCst);
        self.registry
            .broadcast_all(&Event::status("desktop bridge connected", "info"));
    }

    /// The extraction surface disappeared. Whatever accumulated is flushed
    /// as a completed message rather than silently dropped. Both the socket
    /// close path and the poll error path land here, so the announcement is
    /// guarded the same way `force_complete` is.
    pub async fn on_source_lost(&self) -> Result<()> {
        let flushed = self.engine.lock().force_complete();
        if let Some(EngineEvent::Completed { text, html }) = flushed {
            self.publish_completed(text, html).await?;
        }
        if !self.loss_announced.swap(true, Ordering::SeqCst) {
            self.registry
                .broadcast_all(&Event::status("desktop bridge disconnected", "warning"));
        }
        Ok(())
    }

    /// Outbound path: log the phone-authored message, echo it to every
    /// connection, then hand it to the injection chain.
    pub async fn handle_send(&self, session_id: &str, text: &str) -> Result<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(crate::error::BridgeError::MalformedClientMessage(
                "empty message".into(),
            ));
        }

        self.history.append(&HistoryEntry::user(trimmed)).await?;
        self.registry
            .broadcast_all(&Event::user_echo(trimmed, session_id));

        let outcome = self.injector.inject(trimmed).await?;
        Ok(outcome.method_used)
    }
}
