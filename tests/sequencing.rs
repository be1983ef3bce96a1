//! Sequence restoration: reordering, gap timeouts, and stale forwarding.

mod common;

use std::time::Duration;

use fluxgraph::event_bus::Event;
use fluxgraph::graphs::{Graph, Signature};
use fluxgraph::node::Emission;
use fluxgraph::value::Args;

use common::{capture_events, collector, seen, settle};

/// Entry body that tags each message with its own value as the sequence
/// id, so tests control arrival order and tag independently.
fn tag_with_value(args: Args) -> fluxgraph::node::FunctionResult {
    let n = args.int(0)?;
    Ok(Emission::push(Args::single(n), n as u64))
}

#[tokio::test]
async fn out_of_order_arrivals_are_released_in_order() {
    let seen = seen();
    let mut graph = Graph::new(8);
    let tagger = graph
        .add_function(&[], Signature::int_to_int(), tag_with_value)
        .unwrap();
    let sequencer = graph.add_sequencer(&[tagger]).unwrap();
    graph
        .add_function(&[sequencer], Signature::int_to_int(), collector(&seen))
        .unwrap();
    graph.compile().unwrap();

    for n in [2i64, 0, 4, 1, 3] {
        assert!(graph.enqueue(Args::single(n)).await.unwrap());
    }
    graph.wait().await.unwrap();
    assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn a_missing_id_is_skipped_after_the_gap_timeout() {
    let seen = seen();
    let mut graph = Graph::new(8);
    let tagger = graph
        .add_function(&[], Signature::int_to_int(), tag_with_value)
        .unwrap();
    let sequencer = graph
        .add_sequencer_with_timeout(&[tagger], Duration::from_millis(200))
        .unwrap();
    graph
        .add_function(&[sequencer], Signature::int_to_int(), collector(&seen))
        .unwrap();
    graph.compile().unwrap();
    let events = capture_events(&graph);

    // Sequence id 0 never arrives; 1 and 2 must not be stuck forever.
    graph.enqueue(Args::single(1)).await.unwrap();
    graph.enqueue(Args::single(2)).await.unwrap();
    graph.wait().await.unwrap();
    assert_eq!(*seen.lock(), vec![1, 2]);

    settle().await;
    let gaps: Vec<_> = events
        .snapshot()
        .into_iter()
        .filter(|event| matches!(event, Event::Sequencer(e) if e.observed.is_none()))
        .collect();
    assert_eq!(gaps.len(), 1, "exactly one gap diagnostic for id 0");
}

#[tokio::test(start_paused = true)]
async fn stale_ids_are_forwarded_with_a_diagnostic() {
    let seen = seen();
    let mut graph = Graph::new(8);
    let tagger = graph
        .add_function(&[], Signature::int_to_int(), tag_with_value)
        .unwrap();
    let sequencer = graph
        .add_sequencer_with_timeout(&[tagger], Duration::from_millis(100))
        .unwrap();
    graph
        .add_function(&[sequencer], Signature::int_to_int(), collector(&seen))
        .unwrap();
    graph.compile().unwrap();
    let events = capture_events(&graph);

    // Let the cursor advance past 0 via the gap timeout, then deliver 0.
    graph.enqueue(Args::single(1)).await.unwrap();
    graph.wait().await.unwrap();
    assert_eq!(*seen.lock(), vec![1]);

    graph.enqueue(Args::single(0)).await.unwrap();
    graph.wait().await.unwrap();
    assert_eq!(*seen.lock(), vec![1, 0], "late message forwarded as-is");

    settle().await;
    let stale: Vec<_> = events
        .snapshot()
        .into_iter()
        .filter(|event| matches!(event, Event::Sequencer(e) if e.observed == Some(0)))
        .collect();
    assert_eq!(stale.len(), 1);
}

#[tokio::test]
async fn streams_from_two_producers_merge_in_id_order() {
    // Two parallel branches split one tagged stream by parity; the
    // sequencer merges both inbound edges back into global id order.
    let seen = seen();
    let mut graph = Graph::new(8);
    let entry = graph.add_broadcast().unwrap();
    let evens = graph
        .add_function(&[entry], Signature::int_to_int(), |args| {
            let n = args.int(0)?;
            if n % 2 == 0 {
                Ok(Emission::push(Args::single(n), n as u64))
            } else {
                Ok(Emission::ignore())
            }
        })
        .unwrap();
    let odds = graph
        .add_function(&[entry], Signature::int_to_int(), |args| {
            let n = args.int(0)?;
            if n % 2 == 1 {
                Ok(Emission::push(Args::single(n), n as u64))
            } else {
                Ok(Emission::ignore())
            }
        })
        .unwrap();
    let sequencer = graph.add_sequencer(&[evens, odds]).unwrap();
    graph
        .add_function(&[sequencer], Signature::int_to_int(), collector(&seen))
        .unwrap();
    graph.compile().unwrap();

    for n in [3i64, 0, 2, 1, 4] {
        assert!(graph.enqueue(Args::single(n)).await.unwrap());
    }
    graph.wait().await.unwrap();
    assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn batch_groups_release_whole_and_in_id_order() {
    // A batcher flushing several payloads under one sequence id; the
    // sequencer holds the later group until the earlier id arrives, then
    // releases each group intact.
    let seen = seen();
    let mut graph = Graph::new(8);
    let mut calls = 0u64;
    let batcher = graph
        .add_function(&[], Signature::int_to_int(), move |_args| {
            calls += 1;
            if calls == 1 {
                Ok(Emission::push_all(
                    vec![Args::single(11), Args::single(12)],
                    1,
                ))
            } else {
                Ok(Emission::push_all(vec![Args::single(1), Args::single(2)], 0))
            }
        })
        .unwrap();
    let sequencer = graph.add_sequencer(&[batcher]).unwrap();
    graph
        .add_function(&[sequencer], Signature::int_to_int(), collector(&seen))
        .unwrap();
    graph.compile().unwrap();

    graph.enqueue(Args::single(0)).await.unwrap();
    graph.enqueue(Args::single(0)).await.unwrap();
    graph.wait().await.unwrap();
    assert_eq!(*seen.lock(), vec![1, 2, 11, 12]);
}

#[tokio::test]
async fn generated_ids_restore_emission_order() {
    // A Generate fan-out assigns consecutive ids; even if downstream
    // processing shuffles completion order, a sequencer restores it.
    let seen = seen();
    let mut graph = Graph::new(8);
    let fanout = graph
        .add_function(&[], Signature::int_to_int(), |args| {
            let n = args.int(0)?;
            let outputs = (0..5).map(|k| Args::single(n + k)).collect();
            Ok(Emission::generate(outputs))
        })
        .unwrap();
    let sequencer = graph.add_sequencer(&[fanout]).unwrap();
    graph
        .add_function(&[sequencer], Signature::int_to_int(), collector(&seen))
        .unwrap();
    graph.compile().unwrap();

    graph.execute(Args::single(10)).await.unwrap();
    graph.wait().await.unwrap();
    assert_eq!(*seen.lock(), vec![10, 11, 12, 13, 14]);
}
