//! Core identifier types for the Fluxgraph engine.
//!
//! These are the fundamental handles used throughout the system: [`NodeId`]
//! identifies a node within its owning graph, and [`GraphPhase`] names the
//! lifecycle state a graph is in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a node within its owning [`Graph`](crate::graphs::Graph).
///
/// Handles are returned by the `add_*` builder operations and are only
/// meaningful for the graph that produced them. They are cheap to copy and
/// hashable, so they can key auxiliary maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Positional index of this node in its graph's insertion order.
    #[must_use]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Lifecycle state of a [`Graph`](crate::graphs::Graph).
///
/// Transitions are monotone: `Building → Compiled → Running → Drained`.
/// Topology mutation is only legal in `Building`; message injection is only
/// legal from `Compiled` onward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphPhase {
    /// Edges and nodes may still be added.
    Building,
    /// Topology is frozen; no messages injected yet.
    Compiled,
    /// At least one message has been injected and work may be in flight.
    Running,
    /// A drain completed and no tracked messages remain in flight.
    Drained,
}

impl fmt::Display for GraphPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Compiled => write!(f, "compiled"),
            Self::Running => write!(f, "running"),
            Self::Drained => write!(f, "drained"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display() {
        assert_eq!(NodeId(3).to_string(), "node#3");
        assert_eq!(NodeId(3).index(), 3);
    }
}
