// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Record store benchmarks.
//
// Run with:
//   cargo bench --bench store
//
// Groups:
//   store_append:   append one record (lock, stat, positional write)
//   store_read_at:  read one record from stores of three sizes
//   store_read_all: one locked pass over the whole store

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use wsdb::{LockSet, Record, RecordStore, LOCKS_PER_SET, RECORD_SIZE};

const SIZES: &[(&str, u32)] = &[("records_16", 16), ("records_1k", 1024), ("records_16k", 16 * 1024)];

fn sample(i: u32) -> Record {
    let i = i as i32;
    Record::new([2000 + i % 30, i, i + 1, i + 2, i + 3, i + 4, i + 5, i + 6, i + 7])
}

fn open_store(dir: &tempfile::TempDir, tag: &str, records: u32) -> (Arc<LockSet>, RecordStore) {
    let name = format!("wsdb_bench_{tag}_{}", std::process::id());
    LockSet::clear_storage(&name);
    let locks = Arc::new(LockSet::open(&name, LOCKS_PER_SET).expect("lock set"));
    let store =
        RecordStore::open(dir.path().join(format!("{tag}.bin")), Arc::clone(&locks)).expect("store");
    for i in 0..records {
        store.append(&sample(i)).expect("append");
    }
    (locks, store)
}

fn bench_append(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let (locks, store) = open_store(&dir, "append", 0);

    let mut group = c.benchmark_group("store_append");
    group.throughput(Throughput::Bytes(RECORD_SIZE as u64));
    let mut i = 0u32;
    group.bench_function("append", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            black_box(store.append(&sample(i)).expect("append"))
        });
    });
    group.finish();
    locks.destroy();
}

fn bench_read_at(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut group = c.benchmark_group("store_read_at");
    group.throughput(Throughput::Bytes(RECORD_SIZE as u64));

    for &(label, n) in SIZES {
        let (locks, store) = open_store(&dir, &format!("read_{label}"), n);
        let mut ordinal = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(label), &n, |b, &n| {
            b.iter(|| {
                ordinal = ordinal % n as i64 + 1;
                black_box(store.read_at(ordinal).expect("read_at"))
            });
        });
        locks.destroy();
    }
    group.finish();
}

fn bench_read_all(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut group = c.benchmark_group("store_read_all");

    for &(label, n) in SIZES {
        let (locks, store) = open_store(&dir, &format!("all_{label}"), n);
        group.throughput(Throughput::Bytes(n as u64 * RECORD_SIZE as u64));
        group.bench_function(BenchmarkId::from_parameter(label), |b| {
            b.iter(|| black_box(store.read_all().expect("read_all")));
        });
        locks.destroy();
    }
    group.finish();
}

criterion_group!(benches, bench_append, bench_read_at, bench_read_all);
criterion_main!(benches);
