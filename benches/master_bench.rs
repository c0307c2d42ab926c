//! Performance benchmarks for the co-simulation master.
//!
//! Run with: `cargo bench`
//! Or for specific bench: `cargo bench --bench master_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cosim::mock::MockComponent;
use cosim::{ConnectionGraph, CouplingSpec, MasterLoop, MemorySink, SlaveRegistry};

// ============================================================================
// Helpers
// ============================================================================

/// A chain `ramp → gain → gain → ...` of `slaves` components.
fn chain(slaves: usize) -> (SlaveRegistry, Vec<CouplingSpec>) {
    let mut registry = SlaveRegistry::new();
    registry.add(Box::new(MockComponent::ramp("ramp")));
    for i in 1..slaves {
        registry.add(Box::new(MockComponent::gain(format!("gain{i}"), 0.5)));
    }
    let specs = (1..slaves)
        .map(|i| {
            // ramp.y is ref 0, every gain.y is ref 1
            let from_ref = if i == 1 { 0 } else { 1 };
            CouplingSpec::new(i - 1, from_ref, i, 0)
        })
        .collect();
    (registry, specs)
}

// ============================================================================
// Master Loop Benchmarks
// ============================================================================

fn bench_master_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("master_steps");

    for steps in [100u64, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*steps));
        group.bench_with_input(BenchmarkId::new("steps", steps), steps, |b, &steps| {
            b.iter(|| {
                let (mut registry, specs) = chain(2);
                let graph = ConnectionGraph::build(&specs, &registry).unwrap();
                let mut sink = MemorySink::new();
                let report = MasterLoop::new(&mut registry, &graph, steps as f64 * 0.001, 0.001)
                    .unwrap()
                    .run(&mut sink)
                    .unwrap();
                black_box(report.steps);
            });
        });
    }

    group.finish();
}

fn bench_master_slaves(c: &mut Criterion) {
    let mut group = c.benchmark_group("master_slaves");

    for slaves in [2usize, 8, 32].iter() {
        group.throughput(Throughput::Elements(*slaves as u64));
        group.bench_with_input(BenchmarkId::new("slaves", slaves), slaves, |b, &slaves| {
            b.iter(|| {
                let (mut registry, specs) = chain(slaves);
                let graph = ConnectionGraph::build(&specs, &registry).unwrap();
                let mut sink = MemorySink::new();
                let report = MasterLoop::new(&mut registry, &graph, 1.0, 0.01)
                    .unwrap()
                    .run(&mut sink)
                    .unwrap();
                black_box(report.values_propagated);
            });
        });
    }

    group.finish();
}

// ============================================================================
// Propagation Benchmarks
// ============================================================================

fn bench_propagate(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagate");

    for slaves in [2usize, 16, 64].iter() {
        group.throughput(Throughput::Elements(*slaves as u64 - 1));
        group.bench_with_input(BenchmarkId::new("couplings", slaves), slaves, |b, &slaves| {
            let (mut registry, specs) = chain(slaves);
            let graph = ConnectionGraph::build(&specs, &registry).unwrap();
            registry.instantiate_all(false).unwrap();
            registry.initialize_all(0.0, 1.0).unwrap();

            b.iter(|| black_box(graph.propagate(&mut registry).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_master_steps, bench_master_slaves, bench_propagate);
criterion_main!(benches);
