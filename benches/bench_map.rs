#[macro_use]
extern crate criterion;

use criterion::{BenchmarkId, Criterion};
use dashmap::DashMap;
use mapcheck::structures::{ConcurrentMap, SlotMap};
use rand::Rng;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

const KEYS: u64 = 1000;

fn bench_typical<M>(map: Arc<M>, num_threads: usize)
where
    M: ConcurrentMap<u64, u64> + 'static,
{
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();

    for id in 0..num_threads {
        let map_clone = map.clone();
        wait_vec.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let base = (id as u64 % 2) * KEYS;
            for i in 0..KEYS {
                map_clone.insert_if_absent(base + i, i);
            }
            for _ in 0..7000 {
                map_clone.load(&(base + rng.gen_range(0..KEYS)));
            }
            for i in 0..200 {
                map_clone.take_and_remove(&(base + i));
            }
            for i in 200..400 {
                map_clone.store(base + i, i + 1);
            }
        }));
    }

    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_misses<M>(map: Arc<M>, num_threads: usize)
where
    M: ConcurrentMap<u64, u64> + 'static,
{
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();

    for _ in 0..num_threads {
        let map_clone = map.clone();
        wait_vec.push(thread::spawn(move || {
            for i in 0..10000 {
                map_clone.take_and_remove(&(KEYS * 4 + i % KEYS));
            }
        }));
    }

    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_typical_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_typical");
    for num_threads in [2usize, 4, 8, 16] {
        group.bench_with_input(BenchmarkId::new("slot_map", num_threads), &num_threads, |b, &n| {
            b.iter(|| bench_typical(Arc::new(SlotMap::<u64>::with_capacity(4 * KEYS as usize)), n))
        });
        group.bench_with_input(BenchmarkId::new("dashmap", num_threads), &num_threads, |b, &n| {
            b.iter(|| bench_typical(Arc::new(DashMap::<u64, u64>::new()), n))
        });
    }
    group.finish();
}

fn bench_misses_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_delete_absent");
    for num_threads in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::new("slot_map", num_threads), &num_threads, |b, &n| {
            b.iter(|| bench_misses(Arc::new(SlotMap::<u64>::new()), n))
        });
        group.bench_with_input(BenchmarkId::new("dashmap", num_threads), &num_threads, |b, &n| {
            b.iter(|| bench_misses(Arc::new(DashMap::<u64, u64>::new()), n))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_typical_all, bench_misses_all);
criterion_main!(benches);
