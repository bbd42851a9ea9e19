use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::TempDir;
use thinvault_cas::digest::{files_identical, hash_bytes, hash_file};

fn bench_hash_bytes(c: &mut Criterion) {
    let data = vec![0xA5u8; 1024 * 1024]; // 1MB

    let mut group = c.benchmark_group("digest");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("hash_bytes_1mb", |b| b.iter(|| hash_bytes(black_box(&data))));
    group.finish();
}

fn bench_hash_file(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("blob.bin");
    let data: Vec<u8> = (0..16 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect(); // 16MB
    std::fs::write(&path, &data).unwrap();

    let mut group = c.benchmark_group("digest");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.sample_size(20);
    group.bench_function("hash_file_16mb", |b| {
        b.iter(|| hash_file(black_box(&path)).unwrap())
    });
    group.finish();
}

fn bench_files_identical(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a.bin");
    let b = temp.path().join("b.bin");
    let data = vec![7u8; 4 * 1024 * 1024]; // 4MB
    std::fs::write(&a, &data).unwrap();
    std::fs::write(&b, &data).unwrap();

    c.bench_function("files_identical_4mb", |bench| {
        bench.iter(|| files_identical(black_box(&a), black_box(&b)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_hash_bytes,
    bench_hash_file,
    bench_files_identical
);
criterion_main!(benches);
