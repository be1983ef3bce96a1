//! Graph construction and compilation.
//!
//! A [`Graph`] is assembled incrementally through `add_*` operations, each
//! returning a [`NodeId`](crate::types::NodeId) handle used to wire later
//! nodes. Wiring is type-checked immediately against each edge's
//! [`Schema`]. Once the topology is complete, [`Graph::compile`] freezes it,
//! resolves the entry node, and stands up the scheduler; from then on the
//! graph accepts messages via `enqueue`, `execute`, and `wait`.

pub mod builder;
pub mod compilation;
pub mod edges;

pub use builder::Graph;
pub use compilation::GraphError;
pub use edges::{Schema, Signature};
