use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use syncplane_concurrency::{BoundedConcurrentQueue, ClosableBlockingQueue, ClosableQueue};

const MESSAGES: u64 = 10_000;

/// Single thread: add everything, then drain.
fn bench_single_thread_add_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread_add_poll");
    group.throughput(Throughput::Elements(MESSAGES));

    group.bench_function("bounded", |b| {
        b.iter(|| {
            let q = BoundedConcurrentQueue::new(MESSAGES as usize);
            for i in 0..MESSAGES {
                q.add(black_box(i));
            }
            while let Some(i) = q.poll() {
                black_box(i);
            }
        })
    });

    group.bench_function("blocking", |b| {
        b.iter(|| {
            let q = ClosableBlockingQueue::new(MESSAGES as usize, Duration::from_millis(10));
            for i in 0..MESSAGES {
                q.add(black_box(i));
            }
            q.close();
            while let Some(i) = q.poll() {
                black_box(i);
            }
        })
    });

    group.finish();
}

fn run_pipeline<Q>(q: Arc<Q>, producers: u64)
where
    Q: ClosableQueue<u64> + Send + Sync + 'static,
{
    let per_producer = MESSAGES / producers;
    let handles: Vec<_> = (0..producers)
        .map(|_| {
            let q = q.clone();
            thread::spawn(move || {
                for i in 0..per_producer {
                    while !q.add(i) {}
                }
            })
        })
        .collect();

    let mut received = 0;
    while received < per_producer * producers {
        if q.poll().is_some() {
            received += 1;
        }
    }

    for h in handles {
        let _ = h.join();
    }
    q.close();
}

/// N producers, one consumer, small buffer (the replication-worker shape).
fn bench_contended_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_pipeline");
    group.throughput(Throughput::Elements(MESSAGES));
    group.sample_size(20);

    for producers in [1u64, 2, 4] {
        group.bench_with_input(
            BenchmarkId::new("bounded", producers),
            &producers,
            |b, &producers| {
                b.iter(|| run_pipeline(Arc::new(BoundedConcurrentQueue::new(1_000)), producers))
            },
        );

        group.bench_with_input(
            BenchmarkId::new("blocking", producers),
            &producers,
            |b, &producers| {
                b.iter(|| {
                    run_pipeline(
                        Arc::new(ClosableBlockingQueue::new(1_000, Duration::from_millis(10))),
                        producers,
                    )
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_single_thread_add_poll, bench_contended_pipeline);
criterion_main!(benches);
