//! Payload typing at runtime: mixed-kind messages and per-message
//! type-mismatch capture.

mod common;

use fluxgraph::diagnostics::pretty_print_with_mode;
use fluxgraph::graphs::{Graph, Schema, Signature};
use fluxgraph::node::Emission;
use fluxgraph::scheduler::ExecuteError;
use fluxgraph::telemetry::FormatterMode;
use fluxgraph::value::{Args, Handle, Value, ValueKind};

use common::capture_events;

#[tokio::test]
async fn mixed_kind_payloads_travel_positionally() {
    let mut graph = Graph::new(2);
    graph
        .add_function(
            &[],
            Signature::new(
                Schema::Fixed(vec![ValueKind::Int, ValueKind::Str, ValueKind::Float]),
                Schema::single(ValueKind::Str),
            ),
            |args| {
                let label = format!("{}:{}:{}", args.int(0)?, args.str(1)?, args.float(2)?);
                Ok(Emission::generate_one(Args::single(label)))
            },
        )
        .unwrap();
    graph.compile().unwrap();

    let outputs = graph
        .execute(Args::new(vec![
            Value::from(3),
            Value::from("x"),
            Value::from(0.5),
        ]))
        .await
        .unwrap();
    assert_eq!(outputs[0].str(0).unwrap(), "3:x:0.5");
}

#[tokio::test]
async fn handles_round_trip_through_a_pipeline() {
    let mut graph = Graph::new(2);
    let relay = graph
        .add_function(
            &[],
            Signature::new(
                Schema::single(ValueKind::Handle),
                Schema::single(ValueKind::Handle),
            ),
            |args| {
                let handle = args.handle(0)?.clone();
                Ok(Emission::generate_one(Args::single(handle)))
            },
        )
        .unwrap();
    graph.add_queue(&[relay]).unwrap();
    graph.compile().unwrap();

    let payload = Handle::new(vec![1u8, 2, 3]);
    let outputs = graph
        .execute(Args::single(payload.clone()))
        .await
        .unwrap();
    let recovered = outputs[0].handle(0).unwrap();
    assert_eq!(*recovered, payload, "identity is preserved end to end");
    assert_eq!(*recovered.downcast::<Vec<u8>>().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn wrong_kind_access_fails_the_message_not_the_graph() {
    let mut graph = Graph::new(2);
    graph
        .add_function(&[], Signature::int_to_int(), |args| {
            // Deliberately reads the int payload as a float.
            let f = args.float(0)?;
            Ok(Emission::generate_one(Args::single(f)))
        })
        .unwrap();
    graph.compile().unwrap();
    let events = capture_events(&graph);

    let err = graph.execute(Args::single(1)).await.unwrap_err();
    let ExecuteError::NodeFailures { errors } = err else {
        panic!("expected node failures");
    };
    assert_eq!(errors.len(), 1);
    assert!(errors[0].error.message.contains("type mismatch"));

    let rendered = pretty_print_with_mode(&errors, FormatterMode::Plain);
    assert!(rendered.contains("type mismatch: expected float, found int"));

    // The graph survives and processes well-typed traffic afterwards.
    graph.wait().await.unwrap();
    assert_eq!(graph.in_flight(), 0);
    common::settle().await;
    assert!(
        events
            .snapshot()
            .iter()
            .any(|event| event.message().contains("type mismatch"))
    );
}
