//! Content-hash deduplication over extraction candidates.
//!
//! A bounded recently-seen set, scoped to one polling session. This is an
//! accelerator, not a correctness gate: a false negative only lets a
//! duplicate flow on to the stability engine, whose content-equality check
//! absorbs it.

use std::collections::{HashSet, VecDeque};

use sha2::{Digest, Sha256};

use super::Candidate;

/// Dedup key over `(text, role, origin_id)`.
///
/// Two candidates with the same hash are the same observation; the second is
/// discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(candidate: &Candidate) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(candidate.text.as_bytes());
        hasher.update([0]);
        hasher.update(candidate.role.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(candidate.origin_id.as_bytes());
        Self(hasher.finalize().into())
    }
}

/// Bounded FIFO set of recently observed content hashes.
///
/// Cleared whenever the extraction source reconnects, so stale hashes from a
/// dead session cannot suppress genuinely new content.
#[derive(Debug)]
pub struct CandidateDeduper {
    seen: HashSet<ContentHash>,
    order: VecDeque<ContentHash>,
    capacity: usize,
}

impl CandidateDeduper {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Membership test only; no ordering guarantee among hashes.
    pub fn seen(&self, hash: &ContentHash) -> bool {
        self.seen.contains(hash)
    }

    pub fn remember(&mut self, hash: ContentHash) {
        if !self.seen.insert(hash) {
            return;
        }
        self.order.push_back(hash);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }

    /// Returns true when the candidate is new, remembering it as a side
    /// effect.
    pub fn check_and_remember(&mut self, candidate: &Candidate) -> bool {
        let hash = ContentHash::of(candidate);
        if self.seen(&hash) {
            return false;
        }
        self.remember(hash);
        true
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
