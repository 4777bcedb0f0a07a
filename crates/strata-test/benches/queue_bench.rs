//! Benchmarks for Strata queue operations

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use strata_queue::{FnContributor, QueueConfig, SharedContributor, StateQueue};
use strata_test::{AffineContributor, RecordingObserver};

fn populated(count: i32, config: QueueConfig) -> StateQueue<i64> {
    let queue = StateQueue::with_config(0_i64, config).unwrap_or_default();
    for i in 0..count {
        let _ = queue.add(FnContributor::map(i % 7, move |v: i64| v + i64::from(i)).shared());
    }
    queue
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for count in [1, 16, 256] {
        let queue = populated(count, QueueConfig::manual());
        group.bench_with_input(BenchmarkId::from_parameter(count), &queue, |b, queue| {
            b.iter(|| black_box(queue.resolve()))
        });
    }
    group.finish();
}

fn bench_add_remove(c: &mut Criterion) {
    let queue = populated(32, QueueConfig::default());
    let contributor: SharedContributor<i64> = FnContributor::map(3, |v: i64| v * 2).shared();

    c.bench_function("add_remove_cycle", |b| {
        b.iter(|| {
            let _ = queue.add(Arc::clone(&contributor));
            let _ = queue.remove(black_box(&contributor));
        })
    });
}

fn bench_active_emit(c: &mut Criterion) {
    let queue = populated(16, QueueConfig::default());
    let active = AffineContributor::new(100, 1, 0, true);
    let _ = queue.add(active.clone());
    let observer = RecordingObserver::new();
    observer.attach(&queue);

    c.bench_function("active_emit", |b| {
        b.iter(|| {
            active.bump(black_box(1));
            observer.clear();
        })
    });
}

fn bench_batch(c: &mut Criterion) {
    let queue = populated(16, QueueConfig::default());
    let extras: Vec<SharedContributor<i64>> = (0..8)
        .map(|i| FnContributor::map(i, move |v: i64| v - 1).shared())
        .collect();

    c.bench_function("batch_add_clear_8", |b| {
        b.iter(|| {
            queue.batch(|q| {
                for extra in &extras {
                    let _ = q.add(Arc::clone(extra));
                }
                for extra in &extras {
                    let _ = q.remove(extra);
                }
            })
        })
    });
}

criterion_group!(
    benches,
    bench_resolve,
    bench_add_remove,
    bench_active_emit,
    bench_batch
);
criterion_main!(benches);
