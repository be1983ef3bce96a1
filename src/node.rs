//! Node execution primitives for the Fluxgraph dataflow engine.
//!
//! A node body is an opaque user function invoked once per inbound message.
//! It returns an [`Emission`]: zero or more output [`Args`] plus the
//! [`ControlVerb`] telling the scheduler how to tag and dispatch them.
//! Everything else about a node (its variant, wiring, and concurrency
//! class) is configured through the [`Graph`](crate::graphs::Graph)
//! builder and carried in the crate-private [`NodeSpec`].
//!
//! # Concurrency classes
//!
//! - *Serial* bodies (`FnMut`) may capture mutable private state; the
//!   scheduler guarantees at most one invocation at a time per node, so the
//!   state is never observed concurrently.
//! - *Unlimited* bodies (`Fn + Sync`) may run many invocations at once and
//!   must therefore be reentrant-safe; the `Fn` bound enforces this at
//!   compile time.
//!
//! # Examples
//!
//! ```
//! use fluxgraph::node::{Emission, FunctionResult};
//! use fluxgraph::value::Args;
//!
//! // A stateful batcher body: accumulate three values, then flush.
//! let mut batch: Vec<i64> = Vec::new();
//! let mut batch_id: u64 = 0;
//! let mut body = move |args: Args| -> FunctionResult {
//!     batch.push(args.int(0)?);
//!     if batch.len() == 3 {
//!         let flushed = Args::new(batch.drain(..).map(Into::into).collect());
//!         let id = batch_id;
//!         batch_id += 1;
//!         Ok(Emission::push(flushed, id))
//!     } else {
//!         Ok(Emission::hold(batch_id))
//!     }
//! };
//! # let _ = body(Args::single(1));
//! ```

use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::control::ControlVerb;
use crate::graphs::{Graph, Schema};
use crate::value::{Args, Value, ValueError};

/// Output of a single node body invocation.
///
/// Couples the produced payload(s) with the [`ControlVerb`] governing their
/// emission. Constructors cover the four verbs; `outputs` is empty for
/// [`hold`](Emission::hold) and [`ignore`](Emission::ignore).
#[derive(Debug)]
pub struct Emission {
    pub outputs: Vec<Args>,
    pub verb: ControlVerb,
}

impl Emission {
    /// Emit one message downstream tagged with an explicit sequence id.
    #[must_use]
    pub fn push(args: Args, seq: u64) -> Self {
        Self {
            outputs: vec![args],
            verb: ControlVerb::Push(seq),
        }
    }

    /// Emit a group of messages all tagged with the same sequence id.
    ///
    /// Used by batchers that flush several accumulated payloads as one
    /// logical batch.
    #[must_use]
    pub fn push_all(outputs: Vec<Args>, seq: u64) -> Self {
        Self {
            outputs,
            verb: ControlVerb::Push(seq),
        }
    }

    /// Suppress emission, remembering `seq` for the next push.
    #[must_use]
    pub fn hold(seq: u64) -> Self {
        Self {
            outputs: Vec::new(),
            verb: ControlVerb::Hold(seq),
        }
    }

    /// Emit each element as an independent message with engine-assigned,
    /// consecutive sequence ids.
    #[must_use]
    pub fn generate(outputs: Vec<Args>) -> Self {
        Self {
            outputs,
            verb: ControlVerb::Generate,
        }
    }

    /// Emit a single message with the next engine-assigned sequence id.
    #[must_use]
    pub fn generate_one(args: Args) -> Self {
        Self::generate(vec![args])
    }

    /// Suppress emission entirely.
    #[must_use]
    pub fn ignore() -> Self {
        Self {
            outputs: Vec::new(),
            verb: ControlVerb::Ignore,
        }
    }
}

/// Result type returned by Function node bodies.
pub type FunctionResult = Result<Emission, NodeError>;

/// Serial Function body: may capture mutable state, invoked exclusively.
pub type SerialBody = Box<dyn FnMut(Args) -> FunctionResult + Send>;

/// Reentrant Function body; invocations may overlap freely.
pub type ReentrantBody = Arc<dyn Fn(Args) -> FunctionResult + Send + Sync>;

/// Timer body: produces one payload per tick, independent of inbound edges.
pub type TimerBody = Arc<dyn Fn() -> Args + Send + Sync>;

/// Fold step for ConcatUniform: `reducer(accumulator, item) -> accumulator`.
pub type Reducer = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;

/// Errors raised by a node body or by the runtime on its behalf.
///
/// These are captured per message: a failing invocation is reported to the
/// diagnostic sink and to the owning `execute()` caller, and never crashes
/// the scheduler or other in-flight messages.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// A payload was accessed as the wrong kind at runtime.
    #[error(transparent)]
    #[diagnostic(transparent)]
    TypeMismatch(#[from] ValueError),

    /// Expected input data was missing from the inbound message.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(fluxgraph::node::missing_input),
        help("Check that the upstream node produces the required payload.")
    )]
    MissingInput { what: &'static str },

    /// A Generate fan-out needed more concurrency tokens than were
    /// available; the whole invocation is rejected, none of its outputs
    /// are emitted.
    #[error("token budget exhausted: fan-out needs {needed} additional token(s)")]
    #[diagnostic(
        code(fluxgraph::node::backpressure),
        help("Raise the graph's token budget, or emit fewer messages per invocation.")
    )]
    Backpressure { needed: usize },

    /// The body failed (or panicked, for reentrant bodies).
    #[error("node body failed: {0}")]
    #[diagnostic(code(fluxgraph::node::body_failed))]
    Failed(String),

    /// A nested graph reported a failure for the delegated message.
    #[error("subgraph failure: {message}")]
    #[diagnostic(
        code(fluxgraph::node::subgraph),
        help("Inspect the nested graph's diagnostic sink for the underlying node failures.")
    )]
    Subgraph { message: String },
}

/// Variant-specific configuration of a node, produced by the builder and
/// consumed by the scheduler when it spawns the node's execution task.
pub(crate) enum NodeSpec {
    Function {
        body: FunctionBody,
        input_schema: Schema,
    },
    Queue,
    Timer {
        interval: Duration,
        body: TimerBody,
    },
    Sequencer {
        gap_timeout: Duration,
    },
    Concat,
    ConcatUniform {
        seed: Value,
        reducer: Reducer,
    },
    Subgraph {
        graph: Arc<Graph>,
    },
    Broadcast,
}

/// Body storage for the two Function concurrency classes. Serial bodies
/// sit behind a mutex only to make the spec shareable; the owning task
/// takes the body out before its message loop starts.
pub(crate) enum FunctionBody {
    Serial(parking_lot::Mutex<SerialBody>),
    Reentrant(ReentrantBody),
}

impl NodeSpec {
    /// Short variant label used in diagnostics and tracing.
    pub(crate) fn variant(&self) -> &'static str {
        match self {
            Self::Function { .. } => "function",
            Self::Queue => "queue",
            Self::Timer { .. } => "timer",
            Self::Sequencer { .. } => "sequencer",
            Self::Concat => "concat",
            Self::ConcatUniform { .. } => "concat_uniform",
            Self::Subgraph { .. } => "subgraph",
            Self::Broadcast => "broadcast",
        }
    }

    /// Whether this variant is a source the cycle check treats as
    /// cycle-breaking.
    pub(crate) fn breaks_cycles(&self) -> bool {
        matches!(self, Self::Queue | Self::Timer { .. })
    }
}
