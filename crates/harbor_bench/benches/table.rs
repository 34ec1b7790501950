//! Table backend benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use harbor_bench::payload;
use harbor_storage::{FileTable, InMemoryTable, Table};
use tempfile::TempDir;

/// Benchmark InMemoryTable writes.
fn bench_inmemory_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("inmemory_write");

    for size in [64, 1024, 16384].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let table = InMemoryTable::new();
            let data = payload(size);
            let mut i = 0u64;

            b.iter(|| {
                i += 1;
                table.write(black_box(&format!("k{}", i % 1024)), black_box(&data)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark FileTable writes, each synced to disk.
fn bench_file_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_write");
    group.sample_size(20);

    for size in [256, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let table = FileTable::open(temp_dir.path()).unwrap();
            let data = payload(size);
            let mut i = 0u64;

            b.iter(|| {
                i += 1;
                table.write(black_box(&format!("k{}", i % 1024)), black_box(&data)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark reopening a FileTable, which replays the log.
fn bench_file_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_replay");
    group.sample_size(20);

    for records in [100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(records),
            records,
            |b, &records| {
                let temp_dir = TempDir::new().unwrap();
                {
                    let table = FileTable::open(temp_dir.path()).unwrap();
                    let data = payload(256);
                    for i in 0..records {
                        table.write(&format!("k{}", i), &data).unwrap();
                    }
                }

                b.iter(|| {
                    let table = FileTable::open(black_box(temp_dir.path())).unwrap();
                    black_box(table.len());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_inmemory_write,
    bench_file_write,
    bench_file_replay
);
criterion_main!(benches);
