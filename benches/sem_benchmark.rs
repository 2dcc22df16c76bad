/*!
 * Semaphore Benchmarks
 *
 * Uncontended acquire/release and cross-thread hand-off latency
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nexus_kit::sem::SemaphoreEngine;
use nexus_kit::{Timeout, KERNEL_TEAM};
use std::sync::Arc;
use std::thread;

fn bench_uncontended(c: &mut Criterion) {
    let engine = SemaphoreEngine::new(64);
    let sem = engine.create(1, "bench", KERNEL_TEAM).unwrap();

    c.bench_function("acquire_release_uncontended", |b| {
        b.iter(|| {
            engine.acquire(black_box(sem), 1, Timeout::Infinite, false, None).unwrap();
            engine.release(black_box(sem), 1).unwrap();
        });
    });
}

fn bench_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("handoff");

    for rounds in [1usize, 16, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(rounds), &rounds, |b, &rounds| {
            let engine = Arc::new(SemaphoreEngine::new(64));
            b.iter(|| {
                let ping = engine.create(0, "ping", KERNEL_TEAM).unwrap();
                let pong = engine.create(0, "pong", KERNEL_TEAM).unwrap();

                let peer = engine.clone();
                let handle = thread::spawn(move || {
                    for _ in 0..rounds {
                        peer.acquire(ping, 1, Timeout::Infinite, false, None).unwrap();
                        peer.release(pong, 1).unwrap();
                    }
                });

                for _ in 0..rounds {
                    engine.release(ping, 1).unwrap();
                    engine.acquire(pong, 1, Timeout::Infinite, false, None).unwrap();
                }
                handle.join().unwrap();

                engine.delete(ping).unwrap();
                engine.delete(pong).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_group_acquire(c: &mut Criterion) {
    let engine = SemaphoreEngine::new(64);
    let sem = engine.create(0, "group", KERNEL_TEAM).unwrap();

    c.bench_function("release_then_group_acquire", |b| {
        b.iter(|| {
            engine.release(sem, 8).unwrap();
            engine.acquire(sem, black_box(8), Timeout::Try, false, None).unwrap();
        });
    });
}

criterion_group!(benches, bench_uncontended, bench_handoff, bench_group_acquire);
criterion_main!(benches);
