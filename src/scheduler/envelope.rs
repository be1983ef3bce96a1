//! In-flight message envelopes and their accounting traces.
//!
//! Every message carries a [`Trace`]: a set of shared [`Hold`]s tying it
//! back to the concurrency token(s) and `execute` lineage(s) it descends
//! from. Traces are cloned on fan-out and merged on joins; a hold releases
//! its resources only when the last envelope referencing it is dropped, so
//! token release and lineage settlement follow the true lifetime of the
//! message tree without any explicit bookkeeping in node code.

use std::sync::Arc;

use crate::scheduler::lineage::Lineage;
use crate::scheduler::tokens::TokenGovernor;
use crate::types::NodeId;
use crate::value::Args;

/// One unit of accounting: an optional token and an optional lineage
/// membership, both relinquished on drop.
pub(crate) struct Hold {
    governor: Option<Arc<TokenGovernor>>,
    lineage: Option<Arc<Lineage>>,
}

impl Hold {
    fn new(governor: Option<Arc<TokenGovernor>>, lineage: Option<Arc<Lineage>>) -> Self {
        if let Some(lineage) = &lineage {
            lineage.adopt();
        }
        Self { governor, lineage }
    }
}

impl Drop for Hold {
    fn drop(&mut self) {
        if let Some(governor) = &self.governor {
            governor.release(1);
        }
        if let Some(lineage) = &self.lineage {
            lineage.complete_one();
        }
    }
}

/// The set of holds a message is accountable to.
#[derive(Clone, Default)]
pub(crate) struct Trace {
    holds: Vec<Arc<Hold>>,
}

impl Trace {
    /// Trace for a freshly injected message. The caller must have already
    /// acquired one token from `governor`; the hold returns it on release.
    pub(crate) fn root(governor: Arc<TokenGovernor>, lineage: Option<Arc<Lineage>>) -> Self {
        Self {
            holds: vec![Arc::new(Hold::new(Some(governor), lineage))],
        }
    }

    /// Whether this message counts against the token budget.
    pub(crate) fn tracked(&self) -> bool {
        self.holds.iter().any(|hold| hold.governor.is_some())
    }

    /// Distinct lineages this message is accountable to.
    pub(crate) fn lineages(&self) -> Vec<Arc<Lineage>> {
        let mut out: Vec<Arc<Lineage>> = Vec::new();
        for hold in &self.holds {
            if let Some(lineage) = &hold.lineage {
                if !out.iter().any(|seen| Arc::ptr_eq(seen, lineage)) {
                    out.push(Arc::clone(lineage));
                }
            }
        }
        out
    }

    /// Union of the holds of several traces, as produced by a join firing.
    pub(crate) fn merge(traces: impl IntoIterator<Item = Trace>) -> Self {
        let mut holds: Vec<Arc<Hold>> = Vec::new();
        for trace in traces {
            for hold in trace.holds {
                if !holds.iter().any(|seen| Arc::ptr_eq(seen, &hold)) {
                    holds.push(hold);
                }
            }
        }
        Self { holds }
    }

    /// This trace extended with one additional pre-acquired token, used for
    /// the extra messages a Generate emission fans out.
    pub(crate) fn with_extra_token(&self, governor: &Arc<TokenGovernor>) -> Self {
        let mut trace = self.clone();
        trace
            .holds
            .push(Arc::new(Hold::new(Some(Arc::clone(governor)), None)));
        trace
    }
}

/// A payload in flight between two nodes.
#[derive(Clone)]
pub(crate) struct Envelope {
    pub(crate) args: Args,
    pub(crate) seq: Option<u64>,
    pub(crate) from: Option<NodeId>,
    pub(crate) trace: Trace,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_releases_token_once_for_all_clones() {
        let governor = Arc::new(TokenGovernor::new(2));
        assert!(governor.try_acquire(1));
        let trace = Trace::root(Arc::clone(&governor), None);
        let fan_a = trace.clone();
        let fan_b = trace.clone();
        drop(trace);
        drop(fan_a);
        assert_eq!(governor.in_flight(), 1);
        drop(fan_b);
        assert_eq!(governor.in_flight(), 0);
    }

    #[test]
    fn merge_deduplicates_shared_ancestry() {
        let governor = Arc::new(TokenGovernor::new(4));
        assert!(governor.try_acquire(1));
        let root = Trace::root(Arc::clone(&governor), None);
        let merged = Trace::merge([root.clone(), root.clone()]);
        assert_eq!(merged.holds.len(), 1);
        drop(root);
        drop(merged);
        assert_eq!(governor.in_flight(), 0);
    }

    #[tokio::test]
    async fn lineage_settles_when_last_trace_drops() {
        let governor = Arc::new(TokenGovernor::new(2));
        assert!(governor.try_acquire(1));
        let lineage = Arc::new(Lineage::new());
        let trace = Trace::root(Arc::clone(&governor), Some(Arc::clone(&lineage)));
        let clone = trace.clone();
        drop(trace);
        drop(clone);
        let (outputs, errors) = lineage.settled().await;
        assert!(outputs.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn untracked_traces_are_invisible_to_the_budget() {
        let trace = Trace::default();
        assert!(!trace.tracked());
        assert!(trace.lineages().is_empty());
    }
}
