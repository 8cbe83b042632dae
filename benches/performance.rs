//! Performance benchmarks for the versioned store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use snapbase::{Database, Fields, OpContext, Store};

fn body(value: u64) -> Fields {
    json!({"value": value, "name": "benchmark item"})
        .as_object()
        .unwrap()
        .clone()
}

/// Benchmark head reads with varying history depths. Commits are full
/// snapshots, so this should stay flat as history grows.
fn bench_head_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("head_read");

    for depth in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("history_depth", depth), &depth, |b, &depth| {
            let db = Database::in_memory();
            let store = Store::new(&db);
            let ctx = OpContext::anonymous();

            let created = store.add_item(&ctx, body(0), None, None).unwrap();
            for v in 1..depth {
                store.update_item(&ctx, created.item, body(v)).unwrap();
            }

            b.iter(|| black_box(store.head_item(created.item).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark full-snapshot reads with varying numbers of live items.
fn bench_head_items(c: &mut Criterion) {
    let mut group = c.benchmark_group("head_items");

    for count in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::new("live_items", count), &count, |b, &count| {
            let db = Database::in_memory();
            let store = Store::new(&db);
            let ctx = OpContext::anonymous();

            let bodies = (0..count).map(body).collect();
            store.add_items(&ctx, bodies, None, None).unwrap();

            b.iter(|| black_box(store.head_items(None).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark item creation as the store grows.
fn bench_add_item(c: &mut Criterion) {
    c.bench_function("add_item", |b| {
        let db = Database::in_memory();
        let store = Store::new(&db);
        let ctx = OpContext::anonymous();
        let mut n = 0u64;

        b.iter(|| {
            n += 1;
            black_box(store.add_item(&ctx, body(n), None, None).unwrap())
        });
    });
}

/// Benchmark reading an old snapshot from deep history.
fn bench_time_travel_read(c: &mut Criterion) {
    c.bench_function("item_in_old_commit", |b| {
        let db = Database::in_memory();
        let store = Store::new(&db);
        let ctx = OpContext::anonymous();

        let created = store.add_item(&ctx, body(0), None, None).unwrap();
        for v in 1..500 {
            store.update_item(&ctx, created.item, body(v)).unwrap();
        }

        b.iter(|| black_box(store.item_in_commit(created.commit, created.item).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_head_read,
    bench_head_items,
    bench_add_item,
    bench_time_travel_read
);
criterion_main!(benches);
