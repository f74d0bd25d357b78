//! Caching benchmarks for rowcache.
//!
//! Benchmarks for:
//! - Row cache reads, cold and warm
//! - Collection diffs
//! - Persistence context hits and flushes

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rowcache_bench::utils::{generate_row_ids, generate_rows, generate_values};
use rowcache_common::config::ContextConfig;
use rowcache_common::types::{FragmentState, RowId, SessionId, Value};
use rowcache_storage::{
    CollectionFragment, MemoryMapper, MemoryStore, Model, PersistenceContext, RowCache, RowData,
};

fn context_over(store: &Arc<MemoryStore>, model: &Arc<Model>) -> PersistenceContext {
    PersistenceContext::new(
        Arc::clone(model),
        Box::new(MemoryMapper::new(Arc::clone(store))),
        ContextConfig::default(),
        SessionId::new(1),
    )
}

/// Fills a store with `count` rows through an autocommit flush.
fn seeded_store(count: usize) -> (Arc<MemoryStore>, Arc<Model>) {
    let model = Arc::new(Model::new());
    let store = MemoryStore::shared(Arc::clone(&model));
    let mut context = context_over(&store, &model);
    for row in generate_rows(count) {
        if let RowData::Simple(columns) = row.data {
            context.create(row.row_id, columns).unwrap();
        }
    }
    context.flush().unwrap();
    (store, model)
}

/// Benchmark reads through the row cache.
fn bench_row_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/read_through");

    for size in [100, 1_000, 10_000].iter() {
        let rows = generate_rows(*size);
        let row_ids = generate_row_ids(*size);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("cold", size), size, |b, &n| {
            b.iter(|| {
                let cache = RowCache::new(n);
                black_box(cache.read_through(&row_ids, |_| Ok(rows.clone())).unwrap())
            });
        });

        let cache = RowCache::new(*size);
        cache.read_through(&row_ids, |_| Ok(rows.clone())).unwrap();
        group.bench_with_input(BenchmarkId::new("warm", size), size, |b, _| {
            b.iter(|| black_box(cache.read_through(&row_ids, |_| Ok(Vec::new())).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark computing the write for a changed collection.
fn bench_collection_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/collection_diff");

    for size in [10, 100, 1_000].iter() {
        let values = generate_values(*size);
        let mut appended = values.clone();
        appended.push(Value::from("tail"));
        let mut replaced = values.clone();
        replaced[0] = Value::from("head");

        let row_id = RowId::new("acls", 1);
        let mut append =
            CollectionFragment::new(row_id.clone(), values.clone(), FragmentState::Pristine);
        append.set(appended).unwrap();
        let mut replace = CollectionFragment::new(row_id, values, FragmentState::Pristine);
        replace.set(replaced).unwrap();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("append", size), size, |b, _| {
            b.iter(|| black_box(append.diff(false)));
        });
        group.bench_with_input(BenchmarkId::new("replace", size), size, |b, _| {
            b.iter(|| black_box(replace.diff(false)));
        });
    }

    group.finish();
}

/// Benchmark context reads of cached fragments.
fn bench_context_hits(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/context_get");

    for size in [100, 1_000].iter() {
        let (store, model) = seeded_store(*size);
        let row_ids = generate_row_ids(*size);
        let mut context = context_over(&store, &model);
        context.get_multi(&row_ids, false).unwrap();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                for row_id in &row_ids {
                    black_box(context.get_value(row_id, "title").unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark flushing a batch of modified rows.
fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/flush");

    for size in [10, 100, 1_000].iter() {
        let (store, model) = seeded_store(*size);
        let row_ids = generate_row_ids(*size);
        let mut context = context_over(&store, &model);
        context.get_multi(&row_ids, false).unwrap();
        let mut round = 0i64;

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                round += 1;
                for row_id in &row_ids {
                    context.set_value(row_id, "size", Value::Int(round)).unwrap();
                }
                black_box(context.flush().unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_row_cache,
    bench_collection_diff,
    bench_context_hits,
    bench_flush,
);
criterion_main!(benches);
