use capturefile::{CaptureFile, CaptureFileOptions};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::NamedTempFile;

fn generate_record(size: usize) -> Vec<u8> {
    let pattern = b"The quick brown fox jumps over the lazy dog. ";
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        data.extend_from_slice(pattern);
    }
    data.truncate(size);
    data
}

fn bench_add_record_throughput(c: &mut Criterion) {
    let sizes = vec![256, 4 * 1024, 64 * 1024];

    for size in sizes {
        let mut group = c.benchmark_group("add_record");
        group.throughput(Throughput::Bytes(size as u64));

        let record = generate_record(size);
        group.bench_function(BenchmarkId::new("bytes", size), |b| {
            b.iter(|| {
                let temp = NamedTempFile::new().unwrap();
                let options = CaptureFileOptions::new().write(true);
                let mut file = CaptureFile::open(temp.path(), &options).unwrap();
                for _ in 0..100 {
                    file.add_record(black_box(&record)).unwrap();
                }
                file.commit().unwrap();
            });
        });

        group.finish();
    }
}

fn bench_commit_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");
    let record = generate_record(1024);

    group.bench_function("many_small_commits", |b| {
        b.iter(|| {
            let temp = NamedTempFile::new().unwrap();
            let options = CaptureFileOptions::new().write(true);
            let mut file = CaptureFile::open(temp.path(), &options).unwrap();
            for _ in 0..20 {
                file.add_record(black_box(&record)).unwrap();
                file.commit().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_add_record_throughput, bench_commit_overhead);
criterion_main!(benches);
