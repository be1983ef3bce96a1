use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

use fluxgraph::graphs::{Graph, Signature};
use fluxgraph::node::Emission;
use fluxgraph::value::Args;

fn build_chain(length: usize) -> Graph {
    let mut graph = Graph::new(8);
    let mut prev = graph
        .add_function(&[], Signature::int_to_int(), |args| {
            let n = args.int(0)?;
            Ok(Emission::generate_one(Args::single(n)))
        })
        .unwrap();
    for _ in 1..length {
        prev = graph
            .add_function(&[prev], Signature::int_to_int(), |args| {
                let n = args.int(0)?;
                Ok(Emission::generate_one(Args::single(n + 1)))
            })
            .unwrap();
    }
    graph
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_compile");
    for &length in &[16usize, 128, 1024] {
        group.bench_function(format!("chain_{length}"), |b| {
            b.iter_batched(
                || build_chain(length),
                |mut graph| graph.compile().unwrap(),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut graph = build_chain(64);
    graph.compile().unwrap();

    c.bench_function("execute_chain_64", |b| {
        b.to_async(&runtime)
            .iter(|| async { graph.execute(Args::single(0)).await.unwrap() });
    });
}

criterion_group!(benches, bench_compile, bench_execute);
criterion_main!(benches);
