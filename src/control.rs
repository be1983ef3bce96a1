//! Control verbs emitted by node bodies to signal output cardinality.
//!
//! A node body returns its payload(s) alongside a [`ControlVerb`] telling the
//! scheduler what to do with them. Verbs are kept separate from payloads so
//! stateful nodes (batchers, aggregators) can express "not yet" without
//! producing placeholder messages.

use std::fmt;

/// Verb returned by a node body alongside its output payload(s).
///
/// Sequence ids emitted by any single node must be strictly increasing;
/// downstream Sequencer nodes rely on this for correct reordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlVerb {
    /// Emit the payload(s) downstream, tagged with the given sequence id.
    Push(u64),
    /// Suppress emission this invocation but remember the sequence id for the
    /// next `Push` from this node. The engine's own counter stays frozen.
    Hold(u64),
    /// Emit each returned [`Args`](crate::value::Args) as an independent
    /// downstream message, sequence ids assigned consecutively from the
    /// node's internal counter.
    Generate,
    /// Suppress emission entirely; counters untouched.
    Ignore,
}

impl ControlVerb {
    /// Whether this verb produces downstream messages.
    #[must_use]
    pub fn is_emitting(&self) -> bool {
        matches!(self, Self::Push(_) | Self::Generate)
    }

    /// The explicit sequence id carried by `Push`/`Hold`, if any.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Push(seq) | Self::Hold(seq) => Some(*seq),
            Self::Generate | Self::Ignore => None,
        }
    }
}

impl fmt::Display for ControlVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push(seq) => write!(f, "push({seq})"),
            Self::Hold(seq) => write!(f, "hold({seq})"),
            Self::Generate => write!(f, "generate"),
            Self::Ignore => write!(f, "ignore"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_classification() {
        assert!(ControlVerb::Push(0).is_emitting());
        assert!(ControlVerb::Generate.is_emitting());
        assert!(!ControlVerb::Hold(3).is_emitting());
        assert!(!ControlVerb::Ignore.is_emitting());
    }

    #[test]
    fn explicit_seq_ids() {
        assert_eq!(ControlVerb::Push(7).seq(), Some(7));
        assert_eq!(ControlVerb::Hold(7).seq(), Some(7));
        assert_eq!(ControlVerb::Generate.seq(), None);
        assert_eq!(ControlVerb::Ignore.seq(), None);
    }
}
