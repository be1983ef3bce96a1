//! Graph freezing: validation, entry resolution, and scheduler standup.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{info, instrument};

use crate::graphs::builder::Graph;
use crate::graphs::edges::Schema;
use crate::node::NodeSpec;
use crate::scheduler::Scheduler;
use crate::types::{GraphPhase, NodeId};

/// Errors surfaced while building or compiling a graph.
///
/// These are structural errors: they concern the topology and lifecycle,
/// never the payloads flowing at runtime (those are
/// [`NodeError`](crate::node::NodeError)s).
#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum GraphError {
    /// An edge connects schema-incompatible nodes.
    #[error("incompatible edge {from} -> {to}: consumer expects {expected}, producer yields {found}")]
    #[diagnostic(
        code(fluxgraph::graph::type_error),
        help("Adjust one side's signature so the shapes match, or relay through a converting Function node.")
    )]
    TypeError {
        from: NodeId,
        to: NodeId,
        expected: String,
        found: String,
    },

    /// Topology mutation attempted after `compile`.
    #[error("graph is frozen (phase: {phase}); nodes can only be added while building")]
    #[diagnostic(
        code(fluxgraph::graph::frozen),
        help("Perform all add_* calls before compile(). To change topology, build a new graph.")
    )]
    GraphFrozen { phase: GraphPhase },

    /// A producer handle does not belong to this graph.
    #[error("unknown producer node {node}")]
    #[diagnostic(code(fluxgraph::graph::unknown_node))]
    UnknownNode { node: NodeId },

    /// A join was declared with fewer than two producers.
    #[error("join nodes need at least two producers, found {found}")]
    #[diagnostic(code(fluxgraph::graph::join_producers))]
    JoinNeedsProducers { found: usize },

    /// A second Broadcast entry was added.
    #[error("a graph may have at most one broadcast entry node")]
    #[diagnostic(code(fluxgraph::graph::multiple_broadcasts))]
    MultipleBroadcasts,

    /// The topology contains a cycle with no buffering node on it.
    #[error("graph contains an unbuffered cycle")]
    #[diagnostic(
        code(fluxgraph::graph::cycle),
        help("Break the cycle with a Queue node, or remove the back edge.")
    )]
    Cycle,

    /// A child graph was embedded before being compiled.
    #[error("subgraph must be compiled before embedding")]
    #[diagnostic(code(fluxgraph::graph::subgraph_not_compiled))]
    SubgraphNotCompiled,

    /// A runtime operation was invoked before `compile`.
    #[error("graph is not compiled; call compile() first")]
    #[diagnostic(code(fluxgraph::graph::not_compiled))]
    NotCompiled,

    /// Injection attempted on a graph with no resolvable entry node.
    #[error("graph has no entry node to inject into")]
    #[diagnostic(
        code(fluxgraph::graph::missing_entry),
        help("Add a Broadcast node, or a Function node with no producers, to act as the entry.")
    )]
    MissingEntry,
}

impl Graph {
    /// Freezes the topology and stands up the scheduler.
    ///
    /// Validates that the graph is acyclic (cycles through Queue or Timer
    /// nodes are permitted, since those buffer), resolves the entry node
    /// (the Broadcast node when present, otherwise the first Function with
    /// no producers), and transitions the graph to `Compiled`. Node tasks
    /// spawn lazily on the first injected message.
    #[instrument(skip_all, fields(graph_id = %self.graph_id, nodes = self.node_count()))]
    pub fn compile(&mut self) -> Result<(), GraphError> {
        self.ensure_building()?;
        self.check_acyclic()?;
        self.entry = self.resolve_entry();
        self.entry_schema = match self.entry {
            Some(entry) => self.input_schemas[entry.index()].clone(),
            None => Schema::Any,
        };
        self.terminal_schema = self.resolve_terminal_schema();

        let specs = self
            .specs
            .iter_mut()
            .map(|slot| slot.take().expect("node spec consumed before compile"))
            .collect();
        self.scheduler = Some(Arc::new(Scheduler::new(
            self.graph_id.clone(),
            self.n_token,
            self.successors.clone(),
            self.predecessors.clone(),
            self.variants.clone(),
            self.entry,
            specs,
            Arc::clone(&self.bus),
        )));
        self.phase = GraphPhase::Compiled;
        info!(
            nodes = self.node_count(),
            entry = ?self.entry,
            n_token = self.n_token,
            "graph compiled"
        );
        Ok(())
    }

    /// DFS cycle detection. Edges leaving buffering nodes (Queue, Timer)
    /// are not traversed: a cycle running through a buffer cannot deadlock
    /// the scheduler.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;
        let n = self.node_count();
        let mut color = vec![WHITE; n];

        for start in 0..n {
            if color[start] != WHITE {
                continue;
            }
            // Iterative DFS; the stack holds (node, next-successor-index).
            let mut stack = vec![(start, 0usize)];
            color[start] = GRAY;
            while let Some(&mut (node, ref mut next)) = stack.last_mut() {
                let buffered = self.specs[node].as_ref().is_some_and(NodeSpec::breaks_cycles);
                let succs = &self.successors[node];
                if buffered || *next >= succs.len() {
                    color[node] = BLACK;
                    stack.pop();
                    continue;
                }
                let succ = succs[*next].index();
                *next += 1;
                match color[succ] {
                    GRAY => return Err(GraphError::Cycle),
                    WHITE => {
                        color[succ] = GRAY;
                        stack.push((succ, 0));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn resolve_entry(&self) -> Option<NodeId> {
        if let Some(idx) = self.variants.iter().position(|v| *v == "broadcast") {
            return Some(NodeId(idx));
        }
        self.variants
            .iter()
            .enumerate()
            .find(|(idx, v)| **v == "function" && self.predecessors[*idx].is_empty())
            .map(|(idx, _)| NodeId(idx))
    }

    /// Shape of what `execute` returns: when exactly one node is terminal
    /// its output schema, otherwise open.
    fn resolve_terminal_schema(&self) -> Schema {
        let mut terminals = (0..self.node_count()).filter(|&idx| self.successors[idx].is_empty());
        match (terminals.next(), terminals.next()) {
            (Some(only), None) => self.output_schemas[only].clone(),
            _ => Schema::Any,
        }
    }
}
