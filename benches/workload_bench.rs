//! Benchmarks of the per-operation compute cores: Zipfian key draws, key
//! hashing, and shard store access.

use std::time::Duration;

use criterion::{
    black_box, criterion_group, criterion_main, BenchmarkId, Criterion,
};

use shardkv::{
    fnv1a_32, ShardStore, Workload, WorkloadProfile, Xorshift64, ZipfianGen,
};

static KEYSPACES: [u64; 3] = [1000, 100_000, 1_000_000];
static SHARD_COUNTS: [usize; 3] = [1, 10, 100];

fn zipfian_bench_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("zipfian_bench");
    group
        .sample_size(50)
        .warm_up_time(Duration::from_millis(100))
        .measurement_time(Duration::from_secs(3));

    for n in KEYSPACES {
        // construction cost (the O(n) harmonic sum) stays outside the
        // measured draw loop
        let zipf = ZipfianGen::new(n, 0.99).unwrap();
        let mut gen = Xorshift64::new(0xbeef);
        group.bench_with_input(
            BenchmarkId::from_parameter(n),
            &n,
            |b, _| {
                b.iter(|| black_box(zipf.next(&mut gen)));
            },
        );
    }

    group.finish();
}

fn hash_bench_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("fnv1a_bench");
    group
        .sample_size(50)
        .warm_up_time(Duration::from_millis(100))
        .measurement_time(Duration::from_secs(3));

    let keys: Vec<String> = (0..1_000_000u64)
        .step_by(997)
        .map(|k| k.to_string())
        .collect();
    group.bench_function("decimal_keys", |b| {
        let mut idx = 0;
        b.iter(|| {
            idx = (idx + 1) % keys.len();
            black_box(fnv1a_32(keys[idx].as_bytes()))
        });
    });

    group.finish();
}

fn store_bench_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_bench");
    group
        .sample_size(50)
        .warm_up_time(Duration::from_millis(100))
        .measurement_time(Duration::from_secs(3));

    for shards in SHARD_COUNTS {
        let store = ShardStore::new(shards).unwrap();
        let mut workload =
            Workload::with_seed(WorkloadProfile::YcsbB, 100_000, 0.99, 7)
                .unwrap();
        let value = "x".repeat(128);
        group.bench_with_input(
            BenchmarkId::from_parameter(shards),
            &shards,
            |b, _| {
                b.iter(|| {
                    let step = workload.next_step();
                    let key = step.key.to_string();
                    if step.is_read {
                        black_box(store.get(&key));
                    } else {
                        store.put(
                            key,
                            value.clone(),
                            Duration::from_millis(100),
                        );
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    zipfian_bench_group,
    hash_bench_group,
    store_bench_group
);
criterion_main!(benches);
