//! Sequence restoration buffer.
//!
//! A Sequencer node releases messages in strictly increasing sequence
//! order. Out-of-order arrivals park in the buffer until their
//! predecessors show up; a missing id that stays absent past the gap
//! timeout is skipped so one lost message cannot stall the pipeline
//! forever. The buffer itself is synchronous; the owning node task drives
//! it from its message loop and a deadline timer.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

/// Outcome of offering a message to the buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Offer<T> {
    /// Accepted and parked (or immediately releasable; call `drain_ready`).
    Buffered,
    /// Sequence id below the release cursor; the message comes back so the
    /// caller can forward it immediately and report the anomaly.
    Stale(T),
}

/// Reorder buffer keyed by sequence id. Groups (several messages sharing
/// one id) release together.
pub(crate) struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, Vec<T>>,
    gap_timeout: Duration,
    gap_since: Option<Instant>,
}

impl<T> ReorderBuffer<T> {
    pub(crate) fn new(gap_timeout: Duration) -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
            gap_timeout,
            gap_since: None,
        }
    }

    /// The sequence id the buffer is currently waiting for.
    pub(crate) fn expected(&self) -> u64 {
        self.next
    }

    pub(crate) fn offer(&mut self, seq: u64, item: T) -> Offer<T> {
        if seq < self.next {
            return Offer::Stale(item);
        }
        self.pending.entry(seq).or_default().push(item);
        Offer::Buffered
    }

    /// Releases every consecutively-available message starting at the
    /// cursor, in sequence order, and rearms the gap clock.
    pub(crate) fn drain_ready(&mut self) -> Vec<T> {
        let mut released = Vec::new();
        while let Some(group) = self.pending.remove(&self.next) {
            released.extend(group);
            self.next += 1;
        }
        if self.pending.is_empty() {
            self.gap_since = None;
        } else if !released.is_empty() || self.gap_since.is_none() {
            self.gap_since = Some(Instant::now());
        }
        released
    }

    /// When the current wait for a missing id times out.
    pub(crate) fn gap_deadline(&self) -> Option<Instant> {
        self.gap_since.map(|since| since + self.gap_timeout)
    }

    /// Abandons the missing id(s): jumps the cursor to the earliest parked
    /// message. Returns the id that was being waited for. Call
    /// `drain_ready` afterwards to release what became available.
    pub(crate) fn force_advance(&mut self) -> u64 {
        let missing = self.next;
        if let Some(&earliest) = self.pending.keys().next() {
            self.next = earliest;
        }
        self.gap_since = None;
        missing
    }

    /// Releases everything still parked, in sequence order. Used when the
    /// inbound edge closes.
    pub(crate) fn flush(&mut self) -> Vec<T> {
        self.gap_since = None;
        std::mem::take(&mut self.pending)
            .into_values()
            .flatten()
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
