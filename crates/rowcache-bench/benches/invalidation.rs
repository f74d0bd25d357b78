//! Invalidation benchmarks for rowcache.
//!
//! Benchmarks for:
//! - Merging invalidation sets
//! - Queue accumulation and draining
//! - Propagation fan-out across session queues
//! - Cluster frame encoding and decoding

use std::sync::Arc;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rowcache_bench::utils::generate_invalidations;
use rowcache_common::types::NodeId;
use rowcache_invalidation::cluster::frame;
use rowcache_invalidation::{
    InvalidationMessage, Invalidations, InvalidationsPropagator, InvalidationsQueue,
};

/// Benchmark merging one set into another.
fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("invalidation/merge");

    for size in [100, 1_000, 10_000].iter() {
        let incoming = generate_invalidations(*size);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut target = Invalidations::new();
                target.add(&incoming);
                black_box(target.len())
            });
        });
    }

    group.finish();
}

/// Benchmark a queue accumulating many small sets before one drain.
fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("invalidation/queue");

    for batches in [10, 100, 1_000].iter() {
        let batch = generate_invalidations(16);

        group.throughput(Throughput::Elements(*batches as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batches), batches, |b, &n| {
            b.iter(|| {
                let queue = InvalidationsQueue::new("bench");
                for _ in 0..n {
                    queue.add_invalidations(&batch);
                }
                black_box(queue.get_invalidations().len())
            });
        });
    }

    group.finish();
}

/// Benchmark publishing one commit to many sessions.
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("invalidation/fan_out");
    let invalidations = generate_invalidations(64);

    for sessions in [1, 16, 128].iter() {
        let propagator = InvalidationsPropagator::new("bench");
        let queues: Vec<Arc<InvalidationsQueue>> = (0..*sessions)
            .map(|i| Arc::new(InvalidationsQueue::new(format!("session_{}", i))))
            .collect();
        for queue in &queues {
            propagator.add_queue(Arc::clone(queue));
        }

        group.throughput(Throughput::Elements(*sessions as u64));
        group.bench_with_input(BenchmarkId::from_parameter(sessions), sessions, |b, _| {
            b.iter(|| {
                let delivered =
                    propagator.propagate_invalidations(&invalidations, Some(&queues[0]));
                for queue in &queues {
                    queue.get_invalidations();
                }
                black_box(delivered)
            });
        });
    }

    group.finish();
}

/// Benchmark the cluster frame codec.
fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("invalidation/frame");

    for size in [10, 100, 1_000].iter() {
        let message = InvalidationMessage::new("bench", generate_invalidations(*size));
        let encoded: Bytes = frame::encode(NodeId::new(1), &message).unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), size, |b, _| {
            b.iter(|| black_box(frame::encode(NodeId::new(1), &message).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), size, |b, _| {
            b.iter(|| black_box(frame::decode(encoded.clone()).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_merge, bench_queue, bench_fan_out, bench_frame);
criterion_main!(benches);
