//! Performance benchmarks for faasmem
//!
//! Run with: cargo bench --package faasmem-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use faasmem_core::runtime::MockRuntime;
use faasmem_core::{
    ActionRuntime, KeyAllocator, KeyPolicy, Manager, PoolConfig, SharedActionRegistry,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn bench_key_allocate_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_allocate_release");

    for policy in [KeyPolicy::FreeList, KeyPolicy::RandomProbe] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{policy:?}")),
            &policy,
            |b, &policy| {
                let keys = KeyAllocator::new(PoolConfig::default().key_range, policy);
                // half-full namespace so random probing sees collisions
                for _ in 0..keys.capacity() / 2 {
                    let _ = keys.allocate();
                }
                b.iter(|| {
                    // random probing may give up; that is part of the cost
                    black_box(keys.allocate().map(|key| keys.release(key)))
                });
            },
        );
    }
    group.finish();
}

fn bench_shared_borrow(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let runtime = Arc::new(MockRuntime::new());
    let pool = rt
        .block_on(faasmem_core::ActionPool::start(
            Arc::clone(&runtime) as Arc<dyn ActionRuntime>,
            PoolConfig::default(),
        ))
        .unwrap();
    let registry: &SharedActionRegistry = pool.shared();

    c.bench_function("shared_borrow_give_back", |b| {
        b.iter(|| {
            rt.block_on(async {
                let action = registry.borrow(black_box(8)).await.unwrap();
                registry.give_back(&action, 8).await.unwrap();
            })
        });
    });

    rt.block_on(pool.shutdown());
}

fn bench_create_destroy(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let runtime = Arc::new(MockRuntime::new());
    let manager = rt
        .block_on(Manager::start(
            Arc::clone(&runtime) as Arc<dyn ActionRuntime>,
            PoolConfig::default(),
        ))
        .unwrap();

    let mut group = c.benchmark_group("create_destroy");
    group.sample_size(50);
    for size in [1024u64, 1 << 20, 64 << 20].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let key = manager.create_shm("bench", size).await.unwrap();
                    black_box(key);
                    manager.destroy_shm("bench").await.unwrap();
                })
            });
        });
    }
    group.finish();

    rt.block_on(manager.shutdown());
}

criterion_group!(
    benches,
    bench_key_allocate_release,
    bench_shared_borrow,
    bench_create_destroy
);
criterion_main!(benches);
