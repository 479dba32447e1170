//! Extraction source interface and candidate model.
//!
//! The mechanism that actually reads text out of the monitored desktop
//! application lives outside this crate (an injected page script, an
//! accessibility scraper, whatever fits the surface). Here it is only a
//! source that yields raw [`Candidate`]s on demand.
//!
//! [`QueueSource`] is the concrete implementation used in production: the
//! desktop-side script pushes observations over the `/ws/bridge` socket and
//! the polling loop drains them once per tick.

pub mod dedup;
pub mod noise;

pub use dedup::{CandidateDeduper, ContentHash};
pub use noise::{NoiseClassifier, NoiseRules};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Who produced an observed piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    #[default]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Unknown => "unknown",
        }
    }
}

/// One raw text observation from a single poll tick, pre-filter.
///
/// Ephemeral: a candidate lives for one poll cycle unless it survives dedup
/// and noise filtering and enters the stability engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,

    /// Rendered HTML of the same content, when the surface can provide it
    /// (preserves tables and code blocks for the phone view).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,

    #[serde(default)]
    pub role: Role,

    /// Identifier of the extraction position (frame index, container id).
    /// Part of the dedup key so identical text in two places is two
    /// observations.
    #[serde(default)]
    pub origin_id: String,
}

impl Candidate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: None,
            role: Role::Assistant,
            origin_id: String::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn with_origin(mut self, origin_id: impl Into<String>) -> Self {
        self.origin_id = origin_id.into();
        self
    }
}

/// A source of raw message candidates.
///
/// `poll` is idempotent per call and may return empty. Implementations must
/// never block the tick loop for longer than one poll interval.
#[async_trait]
pub trait ExtractionSource: Send + Sync {
    /// Drain the candidates observed since the previous poll.
    async fn poll(&self) -> Result<Vec<Candidate>>;

    /// Whether the underlying surface is currently attached.
    fn is_attached(&self) -> bool;
}

/// Extraction source fed by the desktop-side bridge socket.
///
/// The `/ws/bridge` handler pushes candidates in as they arrive; the tick
/// loop drains them. Detached means the socket is gone and polls fail with
/// [`BridgeError::SourceUnavailable`] until the script reconnects.
pub struct QueueSource {
    queue: Mutex<VecDeque<Candidate>>,
    attached: AtomicBool,
}

impl QueueSource {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            attached: AtomicBool::new(false),
        }
    }

    /// Queue candidates for the next poll.
    pub fn push(&self, candidates: Vec<Candidate>) {
        let mut queue = self.queue.lock();
        queue.extend(candidates);
    }

    /// Mark the desktop link up. Does not clear the queue; observations
    /// buffered while the link flapped are still real.
    pub fn attach(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    /// Mark the desktop link down.
    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Default for QueueSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExtractionSource for QueueSource {
    async fn poll(&self) -> Result<Vec<Candidate>> {
        if !self.is_attached() {
            return Err(BridgeError::SourceUnavailable(
                "desktop bridge socket not connected".to_string(),
            ));
        }
        let mut queue = self.queue.lock();
        Ok(queue.drain(..).collect())
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_while_detached_is_source_unavailable() {
        let source = QueueSource::new();
        let err = source.poll().await.unwrap_err();
        assert!(matches!(err, BridgeError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn poll_drains_queue() {
        let source = QueueSource::new();
        source.attach();
        source.push(vec![Candidate::new("one"), Candidate::new("two")]);

        let first = source.poll().await.unwrap();
        assert_eq!(first.len(), 2);

        // Idempotent: a second poll with nothing queued is empty, not an error
        let second = source.poll().await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn detach_preserves_queued_candidates() {
        let source = QueueSource::new();
        source.attach();
        source.push(vec![Candidate::new("buffered")]);
        source.detach();

        assert!(source.poll().await.is_err());
        assert_eq!(source.queued(), 1);

        source.attach();
        let drained = source.poll().await.unwrap();
        assert_eq!(drained[0].text, "buffered");
    }

    #[test]
    fn candidate_deserializes_with_defaults() {
        let json = r#"{"text":"hello there"}"#;
        let c: Candidate = serde_json::from_str(json).unwrap();
        assert_eq!(c.text, "hello there");
        assert_eq!(c.role, Role::Unknown);
        assert!(c.html.is_none());
        assert!(c.origin_id.is_empty());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(Role::User.as_str(), "user");
    }
}
