//! Descendant tracking for `execute` calls.
//!
//! An `execute` injects one message and must observe everything that
//! message becomes: every derived message adopts the same [`Lineage`],
//! terminal payloads are recorded into it, and the call resolves once the
//! pending count returns to zero.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::diagnostics::ErrorEvent;
use crate::value::Args;

/// Shared accumulator for one injected message's descendant tree.
pub(crate) struct Lineage {
    pending: AtomicUsize,
    outputs: Mutex<Vec<Args>>,
    errors: Mutex<Vec<ErrorEvent>>,
    settled: Notify,
}

impl Lineage {
    pub(crate) fn new() -> Self {
        Self {
            pending: AtomicUsize::new(0),
            outputs: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            settled: Notify::new(),
        }
    }

    /// Registers one more in-flight descendant.
    pub(crate) fn adopt(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks one descendant finished; wakes waiters on the last one.
    pub(crate) fn complete_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.settled.notify_waiters();
        }
    }

    /// Records a payload that reached a terminal node.
    pub(crate) fn record_output(&self, args: Args) {
        self.outputs.lock().push(args);
    }

    /// Records a node failure attributed to this lineage.
    pub(crate) fn record_error(&self, event: ErrorEvent) {
        self.errors.lock().push(event);
    }

    /// Resolves once no descendant remains, yielding the collected
    /// terminal outputs and failures.
    pub(crate) async fn settled(&self) -> (Vec<Args>, Vec<ErrorEvent>) {
        loop {
            let woken = self.settled.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                let outputs = std::mem::take(&mut *self.outputs.lock());
                let errors = std::mem::take(&mut *self.errors.lock());
                return (outputs, errors);
            }
            woken.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn settles_after_last_descendant() {
        let lineage = Arc::new(Lineage::new());
        lineage.adopt();
        lineage.adopt();
        let waiter = {
            let lineage = Arc::clone(&lineage);
            tokio::spawn(async move { lineage.settled().await })
        };
        tokio::task::yield_now().await;
        lineage.record_output(Args::single(1));
        lineage.complete_one();
        tokio::task::yield_now().await;
        lineage.record_output(Args::single(2));
        lineage.complete_one();
        let (outputs, errors) = waiter.await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(errors.is_empty());
    }
}
