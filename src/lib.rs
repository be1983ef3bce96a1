//! # Fluxgraph: In-process Streaming Dataflow Engine
//!
//! Fluxgraph executes typed message pipelines over a graph of asynchronous
//! nodes. Messages carry ordered, runtime-tagged payloads; edges are
//! type-checked at wiring time; a fixed token budget bounds how many
//! messages may be in flight at once.
//!
//! ## Core Concepts
//!
//! - **Values & Args**: runtime-tagged payloads with type-checked access
//! - **Nodes**: Functions (serial or reentrant), Queues, Timers,
//!   Sequencers, joins, Broadcast entries, and nested Subgraphs
//! - **Control verbs**: each body invocation says what to do with its
//!   outputs (push, hold, generate, ignore)
//! - **Token budget**: a budget of 1 gives deterministic serial execution;
//!   larger budgets admit bounded parallelism
//! - **Sequencing**: producers tag messages with sequence ids; a Sequencer
//!   node restores strict order downstream of parallel stages
//!
//! ## Quick Start
//!
//! ```
//! use fluxgraph::graphs::{Graph, Signature};
//! use fluxgraph::node::Emission;
//! use fluxgraph::value::Args;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> miette::Result<()> {
//! let mut graph = Graph::new(4);
//!
//! let double = graph.add_function(&[], Signature::int_to_int(), |args| {
//!     let n = args.int(0)?;
//!     Ok(Emission::generate_one(Args::single(n * 2)))
//! })?;
//! let _square = graph.add_function(&[double], Signature::int_to_int(), |args| {
//!     let n = args.int(0)?;
//!     Ok(Emission::generate_one(Args::single(n * n)))
//! })?;
//! graph.compile()?;
//!
//! let outputs = graph.execute(Args::single(3)).await?;
//! assert_eq!(outputs[0].int(0).unwrap(), 36);
//! graph.wait().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Backpressure
//!
//! [`Graph::enqueue`](graphs::Graph::enqueue) is non-blocking: it returns
//! `Ok(false)` instead of admitting a message when the token budget is
//! exhausted. [`Graph::execute`](graphs::Graph::execute) blocks for a
//! token instead, and additionally waits for the full descendant tree of
//! its message, returning the payloads that reached terminal nodes.
//!
//! ## Module Guide
//!
//! - [`value`] - Payload types ([`value::Value`], [`value::Args`]) and
//!   type-checked access
//! - [`control`] - Control verbs returned by node bodies
//! - [`node`] - Node bodies, emissions, and node-level errors
//! - [`graphs`] - Graph assembly, edge typing, and compilation
//! - [`scheduler`] - Execution errors and scheduler state observation
//! - [`event_bus`] - Structured runtime events and pluggable sinks
//! - [`diagnostics`] - Captured failure records and pretty-printing
//! - [`telemetry`] - Formatters and tracing subscriber setup

pub mod control;
pub mod diagnostics;
pub mod event_bus;
pub mod graphs;
pub mod node;
pub mod scheduler;
pub mod telemetry;
pub mod types;
pub mod value;

pub use graphs::{Graph, GraphError, Schema, Signature};
pub use scheduler::{ExecuteError, SchedulerState};
