//! Nested graphs: delegation, output forwarding, and failure surfacing.

mod common;

use std::sync::Arc;

use fluxgraph::graphs::{Graph, Signature};
use fluxgraph::node::{Emission, NodeError};
use fluxgraph::scheduler::ExecuteError;
use fluxgraph::value::Args;

use common::identity;

fn tripler_child() -> Arc<Graph> {
    let mut child = Graph::new(2);
    child
        .add_function(&[], Signature::int_to_int(), |args| {
            let n = args.int(0)?;
            Ok(Emission::generate_one(Args::single(n * 3)))
        })
        .unwrap();
    child.compile().unwrap();
    Arc::new(child)
}

#[tokio::test]
async fn child_outputs_flow_back_into_the_parent() {
    let child = tripler_child();
    let mut parent = Graph::new(4);
    let entry = parent
        .add_function(&[], Signature::int_to_int(), identity)
        .unwrap();
    let nested = parent.add_subgraph(entry, child).unwrap();
    parent
        .add_function(&[nested], Signature::int_to_int(), |args| {
            let n = args.int(0)?;
            Ok(Emission::generate_one(Args::single(n + 1)))
        })
        .unwrap();
    parent.compile().unwrap();

    let outputs = parent.execute(Args::single(7)).await.unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].int(0).unwrap(), 22);
}

#[tokio::test]
async fn subgraphs_nest_recursively() {
    let inner = tripler_child();
    let mut middle = Graph::new(2);
    let entry = middle
        .add_function(&[], Signature::int_to_int(), identity)
        .unwrap();
    middle.add_subgraph(entry, inner).unwrap();
    middle.compile().unwrap();

    let mut outer = Graph::new(2);
    let entry = outer
        .add_function(&[], Signature::int_to_int(), identity)
        .unwrap();
    outer.add_subgraph(entry, Arc::new(middle)).unwrap();
    outer.compile().unwrap();

    let outputs = outer.execute(Args::single(2)).await.unwrap();
    assert_eq!(outputs[0].int(0).unwrap(), 6);
}

#[tokio::test]
async fn child_failures_surface_as_subgraph_failures() {
    let mut child = Graph::new(1);
    child
        .add_function(&[], Signature::int_to_int(), |args| {
            let n = args.int(0)?;
            if n < 0 {
                Err(NodeError::Failed("negative input".to_string()))
            } else {
                Ok(Emission::generate_one(Args::single(n)))
            }
        })
        .unwrap();
    child.compile().unwrap();

    let mut parent = Graph::new(2);
    let entry = parent
        .add_function(&[], Signature::int_to_int(), identity)
        .unwrap();
    parent.add_subgraph(entry, Arc::new(child)).unwrap();
    parent.compile().unwrap();

    // Positive payloads pass through unharmed.
    let outputs = parent.execute(Args::single(5)).await.unwrap();
    assert_eq!(outputs[0].int(0).unwrap(), 5);

    let err = parent.execute(Args::single(-5)).await.unwrap_err();
    let ExecuteError::NodeFailures { errors } = err else {
        panic!("expected node failures");
    };
    assert!(errors[0].error.message.contains("subgraph failure"));
    assert!(errors[0].error.message.contains("negative input"));

    // The failure released the parent's token; the graph stays usable.
    parent.wait().await.unwrap();
    assert_eq!(parent.in_flight(), 0);
}
