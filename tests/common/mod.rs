//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use fluxgraph::event_bus::MemorySink;
use fluxgraph::graphs::Graph;
use fluxgraph::node::{Emission, FunctionResult};
use fluxgraph::value::Args;

/// Identity body: forwards the single int payload with a fresh sequence id.
pub fn identity(args: Args) -> FunctionResult {
    let n = args.int(0)?;
    Ok(Emission::generate_one(Args::single(n)))
}

/// Shared record of everything a terminal collector observed.
pub type Seen = Arc<Mutex<Vec<i64>>>;

pub fn seen() -> Seen {
    Arc::new(Mutex::new(Vec::new()))
}

/// Terminal body that records the single int payload and emits nothing.
pub fn collector(seen: &Seen) -> impl FnMut(Args) -> FunctionResult + Send + 'static {
    let seen = Arc::clone(seen);
    move |args| {
        seen.lock().push(args.int(0)?);
        Ok(Emission::ignore())
    }
}

/// Let background tasks (event listener, detached deliveries) catch up.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Attach a memory sink to the graph's event bus and return a handle to it.
pub fn capture_events(graph: &Graph) -> MemorySink {
    let sink = MemorySink::new();
    graph.add_event_sink(Arc::new(sink.clone()));
    sink
}
