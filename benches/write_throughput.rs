use blockcache::{Cache, CacheConfig, CancellationToken};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn sequential_write(cache: &Cache, payload_id: &str, chunk_index: u32, block_count: u64) {
    let token = CancellationToken::new();
    let block = vec![0xabu8; 4 * 1024 * 1024];
    for i in 0..block_count {
        cache
            .write(payload_id, chunk_index, &block, i * block.len() as u64, &token)
            .unwrap();
    }
}

fn write_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_write");
    for block_count in [1u64, 4, 16] {
        group.throughput(Throughput::Bytes(block_count * 4 * 1024 * 1024));
        group.bench_function(BenchmarkId::new("blocks", block_count), |b| {
            b.iter(|| {
                let cache = Cache::new(CacheConfig::default());
                sequential_write(&cache, "bench-payload", 0, block_count);
                black_box(cache.stats());
            })
        });
    }
    group.finish();
}

fn random_access_read(c: &mut Criterion) {
    let cache = Cache::new(CacheConfig::default());
    let token = CancellationToken::new();
    sequential_write(&cache, "bench-payload", 0, 16);

    let mut group = c.benchmark_group("random_read");
    group.throughput(Throughput::Bytes(4096));
    group.bench_function("single_block_slice", |b| {
        let mut dest = vec![0u8; 4096];
        b.iter(|| {
            cache
                .read("bench-payload", 0, 2 * 1024 * 1024, &mut dest, &token)
                .unwrap();
            black_box(&dest);
        })
    });
    group.finish();
}

criterion_group!(benches, write_benchmarks, random_access_read);
criterion_main!(benches);
