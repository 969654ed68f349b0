//! Latch acquire/release costs, uncontended and with a queue to drain.

use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use leafsweep_core::{CompactionQueue, CompactionRecord, DatabaseId, Latch, NodeId, SharedLatch};

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("latch/uncontended");
    group.throughput(Throughput::Elements(1));

    let latch = Latch::new("bench");
    group.bench_function("exclusive_latch", |b| {
        b.iter(|| {
            latch.acquire().unwrap();
            latch.release().unwrap();
        });
    });

    let shared = SharedLatch::new("bench-shared");
    group.bench_function("shared_read", |b| {
        b.iter(|| {
            shared.acquire_shared().unwrap();
            shared.release().unwrap();
        });
    });
    group.bench_function("shared_write", |b| {
        b.iter(|| {
            shared.acquire_exclusive().unwrap();
            shared.release().unwrap();
        });
    });

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("latch/contended");
    group.sample_size(20);

    for threads in [2usize, 4] {
        group.bench_function(format!("exclusive_{}_threads", threads), |b| {
            b.iter(|| {
                let latch = Arc::new(Latch::new("contended"));
                let workers: Vec<_> = (0..threads)
                    .map(|_| {
                        let latch = Arc::clone(&latch);
                        thread::spawn(move || {
                            for _ in 0..1_000 {
                                latch.acquire().unwrap();
                                latch.release().unwrap();
                            }
                        })
                    })
                    .collect();
                for w in workers {
                    w.join().unwrap();
                }
                black_box(latch.stats())
            });
        });
    }

    group.finish();
}

fn bench_queue_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue/drain");
    group.throughput(Throughput::Elements(1_000));

    let queue = CompactionQueue::new();
    group.bench_function("fill_and_drain_1000", |b| {
        b.iter(|| {
            for i in 0..1_000u64 {
                let mut record = CompactionRecord::plain(NodeId(i % 100), DatabaseId(1), b"id".to_vec());
                record.add_deleted_key(i.to_be_bytes().to_vec());
                queue.add_record(record);
            }
            black_box(queue.drain_snapshot())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_contended, bench_queue_drain);
criterion_main!(benches);
