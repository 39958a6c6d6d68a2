use conversation_graph::{AddOptions, Camera, ConversationGraph, EngineConfig, NewNode, ViewportSize};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

/// A conversation with `nodes` messages where every `branch_every`-th reply forks from
/// an earlier message instead of the latest one.
fn branching_graph(nodes: usize, branch_every: usize) -> ConversationGraph {
    let mut batch = Vec::with_capacity(nodes);
    for i in 0..nodes {
        let mut node = NewNode::new(if i % 2 == 0 { "user" } else { "assistant" }, format!("message {i}"))
            .with_id(format!("n{i}"));
        if i > 0 {
            let parent = if branch_every > 0 && i % branch_every == 0 {
                i / 2
            } else {
                i - 1
            };
            node = node.with_parent(format!("n{parent}"));
        }
        batch.push(node);
    }
    let mut graph = ConversationGraph::new(EngineConfig::default());
    graph.add_nodes(batch, AddOptions::default());
    graph
}

fn bench_global_layout(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout_global");
    for nodes in [100usize, 1_000, 5_000] {
        let mut graph = branching_graph(nodes, 7);
        group.bench_function(BenchmarkId::from_parameter(nodes), |b| {
            b.iter(|| {
                graph.flush_layout();
                black_box(graph.len());
            });
        });
    }
    group.finish();
}

fn bench_targeted_layout(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout_targeted");
    for nodes in [100usize, 1_000, 5_000] {
        let mut graph = branching_graph(nodes, 7);
        let parent = format!("n{}", nodes / 2);
        group.bench_function(BenchmarkId::from_parameter(nodes), |b| {
            b.iter(|| black_box(graph.layout_children(black_box(&parent))));
        });
    }
    group.finish();
}

fn bench_culling(c: &mut Criterion) {
    let mut group = c.benchmark_group("viewport_culling");
    let viewport = ViewportSize {
        width: 1600.0,
        height: 1000.0,
    };
    for nodes in [1_000usize, 10_000] {
        let mut graph = branching_graph(nodes, 5);
        for i in (0..nodes).step_by(50) {
            graph.set_collapsed(&format!("n{i}"), true);
        }
        let camera = Camera {
            scale: 0.5,
            offset_x: 400.0,
            offset_y: -2_000.0,
        };
        group.bench_function(BenchmarkId::from_parameter(nodes), |b| {
            b.iter(|| black_box(graph.visible_node_ids(black_box(camera), viewport).len()));
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets = bench_global_layout, bench_targeted_layout, bench_culling
);
criterion_main!(benches);
