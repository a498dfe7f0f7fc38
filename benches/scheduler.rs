//! Submit/wait throughput benchmarks using criterion.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use taskpipe::{ClosureTaskSet, TaskScheduler};

fn bench_submit_wait(c: &mut Criterion) {
    let num_threads = num_cpus::get() as u32;
    let scheduler = TaskScheduler::new(num_threads);

    let mut group = c.benchmark_group("submit_wait");
    for &size in &[1_000u32, 100_000, 1_000_000] {
        group.throughput(Throughput::Elements(u64::from(size)));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let total = Arc::new(AtomicU64::new(0));
            let set = {
                let total = Arc::clone(&total);
                Arc::new(ClosureTaskSet::new(size, move |range, _worker_id| {
                    let partial: u64 = range.map(u64::from).sum();
                    total.fetch_add(partial, Ordering::Relaxed);
                }))
            };
            b.iter(|| {
                scheduler.add_task_set(set.clone());
                scheduler.wait_for_task_set(set.as_ref());
            });
        });
    }
    group.finish();
}

fn bench_imbalanced_workload(c: &mut Criterion) {
    // Uneven per-element cost shifts most of the load onto stealing.
    let scheduler = TaskScheduler::new(num_cpus::get() as u32);

    let mut group = c.benchmark_group("imbalanced");
    group.throughput(Throughput::Elements(4_096));
    group.bench_function("spin_heavy_tail", |b| {
        let set = Arc::new(ClosureTaskSet::new(4_096, |range, _worker_id| {
            for index in range {
                let spins = if index % 64 == 0 { 2_000 } else { 10 };
                for _ in 0..spins {
                    std::hint::spin_loop();
                }
            }
        }));
        b.iter(|| {
            scheduler.add_task_set(set.clone());
            scheduler.wait_for_task_set(set.as_ref());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_submit_wait, bench_imbalanced_workload);
criterion_main!(benches);
