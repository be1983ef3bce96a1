//! Incremental graph assembly.
//!
//! [`Graph`] owns the full node table while in the `Building` phase. Each
//! `add_*` operation appends a node, wires it to its producers, and
//! type-checks every new edge on the spot. After [`compile`](Graph::compile)
//! the topology is frozen and all further interaction goes through the
//! runtime operations (`enqueue`, `execute`, `wait`).
//!
//! # Examples
//!
//! ```
//! use fluxgraph::graphs::{Graph, Signature};
//! use fluxgraph::node::Emission;
//! use fluxgraph::value::Args;
//!
//! let mut graph = Graph::new(4);
//! let double = graph.add_function(&[], Signature::int_to_int(), |args| {
//!     let n = args.int(0)?;
//!     Ok(Emission::generate_one(Args::single(n * 2)))
//! })?;
//! let _sink = graph.add_function(&[double], Signature::int_to_int(), |args| {
//!     let n = args.int(0)?;
//!     Ok(Emission::generate_one(Args::single(n)))
//! })?;
//! graph.compile()?;
//! assert!(graph.is_compiled());
//! # Ok::<(), fluxgraph::graphs::GraphError>(())
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;
use uuid::Uuid;

use crate::event_bus::{EventBus, EventSink};
use crate::graphs::compilation::GraphError;
use crate::graphs::edges::{Schema, Signature};
use crate::node::{FunctionBody, FunctionResult, NodeSpec};
use crate::scheduler::{ExecuteError, Scheduler, SchedulerState};
use crate::types::{GraphPhase, NodeId};
use crate::value::{Args, Value, ValueKind};

/// Default window a Sequencer waits on a missing sequence id before
/// declaring a gap and advancing past it.
pub const DEFAULT_GAP_TIMEOUT: Duration = Duration::from_secs(1);

/// A typed dataflow graph of asynchronous nodes.
///
/// Construction happens in the `Building` phase via the `add_*` methods.
/// [`compile`](Graph::compile) transitions the graph to `Compiled` and makes
/// the runtime operations available. The concurrency budget `n_token` caps
/// how many tracked messages may be in flight at once; a budget of 1 yields
/// fully serial, deterministic execution.
pub struct Graph {
    pub(crate) graph_id: String,
    pub(crate) n_token: usize,
    pub(crate) phase: GraphPhase,
    pub(crate) specs: Vec<Option<NodeSpec>>,
    pub(crate) input_schemas: Vec<Schema>,
    pub(crate) output_schemas: Vec<Schema>,
    pub(crate) variants: Vec<&'static str>,
    pub(crate) successors: Vec<Vec<NodeId>>,
    pub(crate) predecessors: Vec<Vec<NodeId>>,
    pub(crate) entry: Option<NodeId>,
    pub(crate) entry_schema: Schema,
    pub(crate) terminal_schema: Schema,
    pub(crate) scheduler: Option<Arc<Scheduler>>,
    pub(crate) bus: Arc<EventBus>,
}

impl Graph {
    /// Creates an empty graph with the given concurrency token budget.
    ///
    /// # Panics
    ///
    /// Panics if `n_token` is zero; a graph with no tokens could never
    /// admit a message.
    #[must_use]
    pub fn new(n_token: usize) -> Self {
        assert!(n_token > 0, "token budget must be at least 1");
        Self {
            graph_id: Uuid::new_v4().to_string(),
            n_token,
            phase: GraphPhase::Building,
            specs: Vec::new(),
            input_schemas: Vec::new(),
            output_schemas: Vec::new(),
            variants: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            entry: None,
            entry_schema: Schema::Any,
            terminal_schema: Schema::Any,
            scheduler: None,
            bus: Arc::new(EventBus::default()),
        }
    }

    /// Adds a serially-invoked Function node.
    ///
    /// The body is `FnMut` and may capture mutable state; the scheduler
    /// never invokes it concurrently with itself. With multiple producers
    /// the node merges: any inbound message from any producer triggers one
    /// invocation.
    #[instrument(skip_all, fields(graph_id = %self.graph_id))]
    pub fn add_function(
        &mut self,
        inputs: &[NodeId],
        signature: Signature,
        body: impl FnMut(Args) -> FunctionResult + Send + 'static,
    ) -> Result<NodeId, GraphError> {
        let Signature {
            inputs: input_schema,
            outputs: output_schema,
        } = signature;
        self.add_node(
            NodeSpec::Function {
                body: FunctionBody::Serial(parking_lot::Mutex::new(Box::new(body))),
                input_schema: input_schema.clone(),
            },
            input_schema,
            output_schema,
            inputs,
        )
    }

    /// Adds a Function node whose body may run unlimited concurrent
    /// invocations.
    ///
    /// The `Fn + Sync` bounds make reentrancy-safety a compile-time
    /// property: the body cannot capture exclusively-mutable state.
    #[instrument(skip_all, fields(graph_id = %self.graph_id))]
    pub fn add_function_concurrent(
        &mut self,
        inputs: &[NodeId],
        signature: Signature,
        body: impl Fn(Args) -> FunctionResult + Send + Sync + 'static,
    ) -> Result<NodeId, GraphError> {
        let Signature {
            inputs: input_schema,
            outputs: output_schema,
        } = signature;
        self.add_node(
            NodeSpec::Function {
                body: FunctionBody::Reentrant(Arc::new(body)),
                input_schema: input_schema.clone(),
            },
            input_schema,
            output_schema,
            inputs,
        )
    }

    /// Adds a Queue node: an unbounded FIFO buffer that decouples producer
    /// and consumer pacing while preserving arrival order and sequence tags.
    pub fn add_queue(&mut self, inputs: &[NodeId]) -> Result<NodeId, GraphError> {
        let output = self.relay_schema(inputs);
        self.add_node(NodeSpec::Queue, Schema::Any, output, inputs)
    }

    /// Adds a Timer source that fires `body` once per `interval`.
    ///
    /// Timer emissions are untracked: they do not consume concurrency
    /// tokens and `wait` does not wait for them.
    pub fn add_timer(
        &mut self,
        interval: Duration,
        outputs: Vec<ValueKind>,
        body: impl Fn() -> Args + Send + Sync + 'static,
    ) -> Result<NodeId, GraphError> {
        self.add_node(
            NodeSpec::Timer {
                interval,
                body: Arc::new(body),
            },
            Schema::Any,
            Schema::Fixed(outputs),
            &[],
        )
    }

    /// Adds a Sequencer that merges one or more sequence-tagged producers
    /// and restores strict sequence order on its output, with the default
    /// gap timeout of one second.
    pub fn add_sequencer(&mut self, inputs: &[NodeId]) -> Result<NodeId, GraphError> {
        self.add_sequencer_with_timeout(inputs, DEFAULT_GAP_TIMEOUT)
    }

    /// Adds a Sequencer with an explicit gap timeout.
    ///
    /// Messages from every producer share one reorder buffer; arrivals out
    /// of order are parked until their predecessors appear. If the next
    /// expected id stays missing for `gap_timeout`, the Sequencer reports a
    /// sequence gap diagnostic and advances past it rather than stalling
    /// the pipeline forever.
    pub fn add_sequencer_with_timeout(
        &mut self,
        inputs: &[NodeId],
        gap_timeout: Duration,
    ) -> Result<NodeId, GraphError> {
        let output = self.relay_schema(inputs);
        self.add_node(
            NodeSpec::Sequencer { gap_timeout },
            Schema::Any,
            output,
            inputs,
        )
    }

    /// Adds a Concat join: waits for one message from every producer, then
    /// emits their payloads concatenated in producer order.
    pub fn add_concat(&mut self, inputs: &[NodeId]) -> Result<NodeId, GraphError> {
        if inputs.len() < 2 {
            return Err(GraphError::JoinNeedsProducers { found: inputs.len() });
        }
        let output = self.concat_schema(inputs);
        self.add_node(NodeSpec::Concat, Schema::Any, output, inputs)
    }

    /// Adds a ConcatUniform join: waits for one single-value message from
    /// every producer, then folds the values into one with `reducer`,
    /// starting from `seed`.
    ///
    /// The reducer is called as `reducer(accumulator, item)` once per
    /// producer, in producer order.
    pub fn add_concat_uniform(
        &mut self,
        inputs: &[NodeId],
        seed: Value,
        reducer: impl Fn(Value, Value) -> Value + Send + Sync + 'static,
    ) -> Result<NodeId, GraphError> {
        if inputs.len() < 2 {
            return Err(GraphError::JoinNeedsProducers { found: inputs.len() });
        }
        let output = Schema::single(seed.kind());
        self.add_node(
            NodeSpec::ConcatUniform {
                seed,
                reducer: Arc::new(reducer),
            },
            Schema::Any,
            output,
            inputs,
        )
    }

    /// Embeds an already-compiled graph as a single node.
    ///
    /// Each inbound message is executed to completion inside the child
    /// graph (under the child's own token budget) and the child's terminal
    /// outputs are forwarded downstream. A child-side node failure
    /// surfaces here as a subgraph failure.
    pub fn add_subgraph(&mut self, input: NodeId, child: Arc<Graph>) -> Result<NodeId, GraphError> {
        if !child.is_compiled() {
            return Err(GraphError::SubgraphNotCompiled);
        }
        let input_schema = child.entry_schema.clone();
        let output_schema = child.terminal_schema.clone();
        self.add_node(
            NodeSpec::Subgraph { graph: child },
            input_schema,
            output_schema,
            &[input],
        )
    }

    /// Adds a Broadcast entry node that fans every injected message out to
    /// all of its consumers.
    ///
    /// At most one Broadcast may exist per graph; when present it is always
    /// the injection entry point.
    pub fn add_broadcast(&mut self) -> Result<NodeId, GraphError> {
        if self.variants.iter().any(|v| *v == "broadcast") {
            return Err(GraphError::MultipleBroadcasts);
        }
        self.add_node(NodeSpec::Broadcast, Schema::Any, Schema::Any, &[])
    }

    /// Wires an additional edge between two existing nodes.
    ///
    /// The `add_*` operations wire producers forward at creation time;
    /// `connect` covers the remaining cases, including back edges. A back
    /// edge must run through a buffering node (Queue or Timer) or
    /// `compile` will reject the resulting cycle.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.ensure_building()?;
        let Some(producer_out) = self.output_schemas.get(from.index()) else {
            return Err(GraphError::UnknownNode { node: from });
        };
        let Some(consumer_in) = self.input_schemas.get(to.index()) else {
            return Err(GraphError::UnknownNode { node: to });
        };
        if !consumer_in.accepts(producer_out) {
            return Err(GraphError::TypeError {
                from,
                to,
                expected: consumer_in.to_string(),
                found: producer_out.to_string(),
            });
        }
        self.successors[from.index()].push(to);
        self.predecessors[to.index()].push(from);
        Ok(())
    }

    /// Attaches a diagnostic event sink. Events raised after attachment
    /// are delivered to it alongside any previously attached sinks.
    pub fn add_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.bus.add_sink(sink);
    }

    // ------------------------------------------------------------------
    // Runtime operations (available once compiled)
    // ------------------------------------------------------------------

    /// Injects a message without waiting for its descendants.
    ///
    /// Returns `Ok(false)` when the token budget is exhausted
    /// (backpressure); the message is not admitted and the caller may
    /// retry. Returns an error if the graph is not compiled or has no
    /// entry node.
    pub async fn enqueue(&self, args: Args) -> Result<bool, GraphError> {
        self.scheduler()?.enqueue(args).await
    }

    /// Injects a message and waits for its entire descendant tree to
    /// settle, returning the payloads that reached terminal nodes.
    ///
    /// Blocks (asynchronously) for a token if the budget is exhausted.
    /// Node failures anywhere in the message's lineage surface as
    /// [`ExecuteError::NodeFailures`].
    pub async fn execute(&self, args: Args) -> Result<Vec<Args>, ExecuteError> {
        let scheduler = self.scheduler().map_err(ExecuteError::Graph)?;
        scheduler.execute(args).await
    }

    /// Waits until no tracked message remains in flight, then transitions
    /// the graph to `Drained`.
    ///
    /// Untracked timer ticks do not delay the drain.
    pub async fn wait(&self) -> Result<(), GraphError> {
        self.scheduler()?.wait().await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> GraphPhase {
        match &self.scheduler {
            None => self.phase,
            Some(scheduler) => scheduler.graph_phase(),
        }
    }

    /// Whether `compile` has succeeded.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Number of nodes added so far.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.variants.len()
    }

    /// The concurrency token budget this graph was created with.
    #[must_use]
    pub fn token_budget(&self) -> usize {
        self.n_token
    }

    /// Tracked messages currently in flight (0 before compilation).
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.scheduler
            .as_ref()
            .map_or(0, |scheduler| scheduler.in_flight())
    }

    /// Scheduler activity, once compiled.
    #[must_use]
    pub fn scheduler_state(&self) -> Option<SchedulerState> {
        self.scheduler.as_ref().map(|scheduler| scheduler.state())
    }

    /// The resolved entry node, if any (set by `compile`).
    #[must_use]
    pub fn entry(&self) -> Option<NodeId> {
        self.entry
    }

    /// Downstream consumers of `node`.
    #[must_use]
    pub fn successors(&self, node: NodeId) -> &[NodeId] {
        self.successors
            .get(node.index())
            .map_or(&[], Vec::as_slice)
    }

    /// Variant label of `node` ("function", "queue", ...).
    #[must_use]
    pub fn variant(&self, node: NodeId) -> Option<&'static str> {
        self.variants.get(node.index()).copied()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn scheduler(&self) -> Result<&Arc<Scheduler>, GraphError> {
        self.scheduler.as_ref().ok_or(GraphError::NotCompiled)
    }

    pub(crate) fn ensure_building(&self) -> Result<(), GraphError> {
        if self.phase == GraphPhase::Building {
            Ok(())
        } else {
            Err(GraphError::GraphFrozen { phase: self.phase() })
        }
    }

    /// Output schema of a structural relay node: adopts its sole
    /// producer's shape when there is exactly one, otherwise stays open.
    fn relay_schema(&self, inputs: &[NodeId]) -> Schema {
        match inputs {
            [only] => self
                .output_schemas
                .get(only.index())
                .cloned()
                .unwrap_or(Schema::Any),
            _ => Schema::Any,
        }
    }

    /// Output schema of a Concat join: the producer schemas concatenated,
    /// when every producer's shape is fixed.
    fn concat_schema(&self, inputs: &[NodeId]) -> Schema {
        let mut kinds = Vec::new();
        for input in inputs {
            match self.output_schemas.get(input.index()) {
                Some(Schema::Fixed(k)) => kinds.extend_from_slice(k),
                _ => return Schema::Any,
            }
        }
        Schema::Fixed(kinds)
    }

    fn add_node(
        &mut self,
        spec: NodeSpec,
        input_schema: Schema,
        output_schema: Schema,
        inputs: &[NodeId],
    ) -> Result<NodeId, GraphError> {
        self.ensure_building()?;
        let id = NodeId(self.variants.len());
        for input in inputs {
            let Some(producer_out) = self.output_schemas.get(input.index()) else {
                return Err(GraphError::UnknownNode { node: *input });
            };
            if !input_schema.accepts(producer_out) {
                return Err(GraphError::TypeError {
                    from: *input,
                    to: id,
                    expected: input_schema.to_string(),
                    found: producer_out.to_string(),
                });
            }
        }
        self.variants.push(spec.variant());
        self.specs.push(Some(spec));
        self.input_schemas.push(input_schema);
        self.output_schemas.push(output_schema);
        self.successors.push(Vec::new());
        self.predecessors.push(inputs.to_vec());
        for input in inputs {
            self.successors[input.index()].push(id);
        }
        Ok(id)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("graph_id", &self.graph_id)
            .field("n_token", &self.n_token)
            .field("phase", &self.phase())
            .field("nodes", &self.variants)
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Emission;

    fn identity(args: Args) -> FunctionResult {
        let n = args.int(0)?;
        Ok(Emission::generate_one(Args::single(n)))
    }

    #[test]
    fn wiring_checks_schemas() {
        let mut graph = Graph::new(1);
        let src = graph
            .add_function(&[], Signature::int_to_int(), identity)
            .unwrap();
        let err = graph
            .add_function(
                &[src],
                Signature::new(
                    Schema::single(ValueKind::Str),
                    Schema::single(ValueKind::Str),
                ),
                identity,
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::TypeError { .. }));
    }

    #[test]
    fn unknown_producer_rejected() {
        let mut graph = Graph::new(1);
        let err = graph
            .add_function(&[NodeId(42)], Signature::int_to_int(), identity)
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode { .. }));
    }

    #[test]
    fn joins_need_at_least_two_producers() {
        let mut graph = Graph::new(1);
        let src = graph
            .add_function(&[], Signature::int_to_int(), identity)
            .unwrap();
        let err = graph.add_concat(&[src]).unwrap_err();
        assert!(matches!(
            err,
            GraphError::JoinNeedsProducers { found: 1 }
        ));
    }

    #[test]
    fn at_most_one_broadcast() {
        let mut graph = Graph::new(1);
        graph.add_broadcast().unwrap();
        assert!(matches!(
            graph.add_broadcast(),
            Err(GraphError::MultipleBroadcasts)
        ));
    }

    #[test]
    fn concat_output_concatenates_fixed_shapes() {
        let mut graph = Graph::new(1);
        let a = graph
            .add_function(&[], Signature::int_to_int(), identity)
            .unwrap();
        let b = graph
            .add_function(
                &[],
                Signature::new(
                    Schema::single(ValueKind::Int),
                    Schema::single(ValueKind::Str),
                ),
                |args| Ok(Emission::generate_one(Args::single(args.int(0)?.to_string()))),
            )
            .unwrap();
        let join = graph.add_concat(&[a, b]).unwrap();
        assert_eq!(
            graph.output_schemas[join.index()],
            Schema::Fixed(vec![ValueKind::Int, ValueKind::Str])
        );
    }
}
