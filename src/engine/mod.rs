//! Stability detection over the consolidated candidate stream.
//!
//! The extraction surface has no notion of "message finished": content grows
//! incrementally while the assistant generates and then stops changing. This
//! engine uses a debounce as the finished-signal proxy — no new content for
//! `stable_threshold` consecutive poll ticks means the stream is complete.
//! That is an approximation, not a guaranteed boundary: a long pause
//! mid-generation can be misclassified as completion, which is why the
//! threshold is configuration, not a constant.
//!
//! ```text
//!                 candidates          candidates
//!                 ┌────────┐          ┌────────┐
//!                 ▼        │          ▼        │
//!   Idle ── candidates ──▶ Streaming ─┘        │
//!    ▲                        │  silence x N   │
//!    └──── Completed ◀────────┘                │
//! ```

use crate::extract::Candidate;

/// Output of one engine tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The stream grew; carries the full consolidated buffer so far.
    Partial { text: String },

    /// The stream went quiet long enough to be declared finished.
    Completed { text: String, html: Option<String> },
}

/// Accumulation state for the single logical conversation.
///
/// Owned exclusively by the engine and mutated only on poll ticks; reset to
/// empty immediately after every Completed.
#[derive(Debug, Default)]
struct StreamState {
    /// Consolidated segments, newline-joined on emit. A segment is replaced
    /// in place when a later candidate extends it (growing prefix), so
    /// superseded partial snapshots never reach the completed output.
    segments: Vec<String>,

    /// HTML of the most recent candidate that carried any.
    html_of_last: Option<String>,

    streaming: bool,

    /// Consecutive ticks without new content. Meaningful only while
    /// streaming.
    idle_cycles: u32,
}

impl StreamState {
    fn buffer(&self) -> String {
        self.segments.join("\n")
    }

    fn buffer_len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum::<usize>() + self.segments.len().saturating_sub(1)
    }

    fn reset(&mut self) {
        self.segments.clear();
        self.html_of_last = None;
        self.streaming = false;
        self.idle_cycles = 0;
    }
}

/// The Idle/Streaming state machine, evaluated once per poll tick with the
/// full filtered, deduplicated candidate set for that tick.
#[derive(Debug)]
pub struct StabilityEngine {
    state: StreamState,
    stable_threshold: u32,
    max_buffer_bytes: usize,
}

impl StabilityEngine {
    pub fn new(stable_threshold: u32, max_buffer_bytes: usize) -> Self {
        Self {
            state: StreamState::default(),
            stable_threshold: stable_threshold.max(1),
            max_buffer_bytes: max_buffer_bytes.max(1),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state.streaming
    }

    /// Advance the machine one tick.
    ///
    /// Empty candidate sets count toward stability; non-empty sets are
    /// absorbed into the buffer and emit a partial update. The buffer cap
    /// force-completes a stream that never goes quiet, so continuous
    /// noise-filtered jitter cannot grow the buffer without bound.
    pub fn tick(&mut self, candidates: &[Candidate]) -> Option<EngineEvent> {
        let fresh: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| !c.text.trim().is_empty())
            .collect();

        if !fresh.is_empty() {
            for candidate in fresh {
                self.absorb(candidate);
            }
            self.state.streaming = true;
            self.state.idle_cycles = 0;

            if self.state.buffer_len() >= self.max_buffer_bytes {
                tracing::warn!(
                    bytes = self.state.buffer_len(),
                    cap = self.max_buffer_bytes,
                    "stream buffer hit cap, forcing completion"
                );
                return self.force_complete();
            }

            return Some(EngineEvent::Partial {
                text: self.state.buffer(),
            });
        }

        if !self.state.streaming {
            return None;
        }

        self.state.idle_cycles += 1;
        if self.state.idle_cycles < self.stable_threshold {
            return None;
        }

        self.force_complete()
    }

    /// Flush whatever has accumulated as a Completed event and return to
    /// Idle. Used by the tick path on stability, and directly when the
    /// extraction source disappears mid-stream.
    pub fn force_complete(&mut self) -> Option<EngineEvent> {
        if !self.state.streaming || self.state.segments.is_empty() {
            self.state.reset();
            return None;
        }

        let event = EngineEvent::Completed {
            text: self.state.buffer(),
            html: self.state.html_of_last.clone(),
        };
        self.state.reset();
        Some(event)
    }

    /// Reset without emitting. Used when polling stops.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    fn absorb(&mut self, candidate: &Candidate) {
        let text = candidate.text.trim();

        if let Some(html) = &candidate.html {
            self.state.html_of_last = Some(html.clone());
        }

        let grows_last = self
            .state
            .segments
            .last()
            .is_some_and(|last| text.starts_with(last.as_str()));

        if grows_last {
            // Growing prefix: the surface re-reported the same message with
            // more content. Replace rather than append.
            if let Some(last) = self.state.segments.last_mut() {
                *last = text.to_string();
            }
        } else if self.state.segments.iter().any(|s| s.contains(text)) {
            // Already absorbed somewhere in the buffer (dedup false
            // negative); drop it.
        } else {
            self.state.segments.push(text.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> StabilityEngine {
        StabilityEngine::new(6, 256 * 1024)
    }

    fn partial_text(event: Option<EngineEvent>) -> String {
        match event {
            Some(EngineEvent::Partial { text }) => text,
            other => panic!("expected PartialUpdate, got {:?}", other),
        }
    }

    #[test]
    fn idle_with_no_candidates_stays_idle() {
        let mut e = engine();
        for _ in 0..20 {
            assert_eq!(e.tick(&[]), None);
        }
        assert!(!e.is_streaming());
    }

    #[test]
    fn first_candidates_start_streaming_with_partial() {
        let mut e = engine();
        let event = e.tick(&[Candidate::new("First chunk of the answer")]);
        assert_eq!(partial_text(event), "First chunk of the answer");
        assert!(e.is_streaming());
    }

    #[test]
    fn distinct_chunks_join_with_newline() {
        let mut e = engine();
        e.tick(&[Candidate::new("alpha")]);
        e.tick(&[Candidate::new("beta")]);
        let event = e.tick(&[Candidate::new("gamma")]);
        assert_eq!(partial_text(event), "alpha\nbeta\ngamma");
    }

    #[test]
    fn completes_exactly_at_threshold() {
        // Content on ticks 1-3, silence after; threshold 6 means the single
        // Completed lands on tick 9.
        let mut e = engine();
        e.tick(&[Candidate::new("one")]);
        e.tick(&[Candidate::new("two")]);
        e.tick(&[Candidate::new("three")]);

        let mut completed_at = None;
        for tick in 4..=12 {
            if let Some(EngineEvent::Completed { text, .. }) = e.tick(&[]) {
                assert!(completed_at.is_none(), "second completion emitted");
                assert_eq!(text, "one\ntwo\nthree");
                completed_at = Some(tick);
            }
        }
        assert_eq!(completed_at, Some(9));
        assert!(!e.is_streaming());
    }

    #[test]
    fn growing_prefix_replaces_instead_of_appending() {
        let mut e = engine();
        e.tick(&[Candidate::new("Hello"), Candidate::new("Hello world")]);

        let mut completed = None;
        for _ in 0..6 {
            if let Some(EngineEvent::Completed { text, .. }) = e.tick(&[]) {
                completed = Some(text);
            }
        }
        assert_eq!(completed.as_deref(), Some("Hello world"));
    }

    #[test]
    fn growing_prefix_across_ticks_replaces_too() {
        let mut e = engine();
        e.tick(&[Candidate::new("The answer is")]);
        let event = e.tick(&[Candidate::new("The answer is forty-two.")]);
        assert_eq!(partial_text(event), "The answer is forty-two.");
    }

    #[test]
    fn already_contained_text_is_absorbed_silently() {
        let mut e = engine();
        e.tick(&[Candidate::new("complete message body")]);
        // Dedup false negative re-delivers a substring
        let event = e.tick(&[Candidate::new("message body")]);
        assert_eq!(partial_text(event), "complete message body");
    }

    #[test]
    fn new_content_resets_idle_count() {
        let mut e = engine();
        e.tick(&[Candidate::new("start")]);
        for _ in 0..5 {
            assert_eq!(e.tick(&[]), None);
        }
        // One tick short of completing; fresh content restarts the count
        e.tick(&[Candidate::new("more")]);
        for _ in 0..5 {
            assert_eq!(e.tick(&[]), None);
        }
        let event = e.tick(&[]);
        assert!(matches!(event, Some(EngineEvent::Completed { .. })));
    }

    #[test]
    fn completion_carries_html_of_last() {
        let mut e = engine();
        e.tick(&[Candidate::new("a table follows").with_html("<table><tr/></table>")]);
        e.tick(&[Candidate::new("plain trailer")]);

        let mut html = None;
        for _ in 0..6 {
            if let Some(EngineEvent::Completed { html: h, .. }) = e.tick(&[]) {
                html = h;
            }
        }
        assert_eq!(html.as_deref(), Some("<table><tr/></table>"));
    }

    #[test]
    fn state_resets_after_completion() {
        let mut e = engine();
        e.tick(&[Candidate::new("first message")]);
        for _ in 0..6 {
            e.tick(&[]);
        }

        let event = e.tick(&[Candidate::new("second message")]);
        assert_eq!(partial_text(event), "second message");
    }

    #[test]
    fn buffer_cap_forces_completion() {
        let mut e = StabilityEngine::new(6, 64);
        e.tick(&[Candidate::new("x".repeat(40))]);
        let event = e.tick(&[Candidate::new("y".repeat(40))]);
        assert!(
            matches!(event, Some(EngineEvent::Completed { .. })),
            "oversized buffer should force-complete, got {:?}",
            event
        );
        assert!(!e.is_streaming());
    }

    #[test]
    fn force_complete_flushes_mid_stream() {
        let mut e = engine();
        e.tick(&[Candidate::new("partial content so far")]);

        let event = e.force_complete();
        match event {
            Some(EngineEvent::Completed { text, .. }) => {
                assert_eq!(text, "partial content so far");
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[test]
    fn force_complete_while_idle_is_a_no_op() {
        let mut e = engine();
        assert_eq!(e.force_complete(), None);
    }

    #[test]
    fn whitespace_only_candidates_are_ignored() {
        let mut e = engine();
        assert_eq!(e.tick(&[Candidate::new("   \n  ")]), None);
        assert!(!e.is_streaming());
    }
}
