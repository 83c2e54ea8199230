// houndb - search_bench.rs
// Criterion benchmark suite for index and collection query performance.
//
// Run with:
//   cargo bench --bench search_bench
//   cargo bench --bench search_bench -- --output-format bencher
//
// Benchmarks:
//   - search_by_size/{100,1000,10000}   (HNSW, D=128)
//   - search_by_dim/{32,128,512}        (fixed N=1000)
//   - search_topk/{1,10,100}
//   - search_by_metric/{cosine,euclidean,dot}
//   - exact_search_1k                   (brute force baseline)
//   - insert_batch_1k                   (1000 index inserts, D=128)
//   - filtered_query                    (collection query + predicate)
//   - cosine_similarity_raw_128d

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use houndb::embedding::cosine_similarity;
use houndb::{
    Attribute, CollectionManager, CollectionSpec, DataType, HnswIndex, HnswParams, HoundConfig,
    Metric, NewRecord, Predicate, QueryRequest, RecordId,
};

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Pseudo-random f32 vector in [-1, 1] from a simple LCG.
fn gen_vec(seed: u64, dim: usize) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..dim)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as f32) / (u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

fn build_index(n: usize, dim: usize, metric: Metric) -> HnswIndex {
    let mut index = HnswIndex::new(dim, metric, HnswParams::default().seeded(11));
    for i in 0..n {
        index
            .insert(RecordId::from(uuid::Uuid::new_v4()), &gen_vec(i as u64, dim))
            .unwrap();
    }
    index
}

// ── Search by Dataset Size ────────────────────────────────────────────────────

fn bench_search_by_size(c: &mut Criterion) {
    const DIM: usize = 128;
    const TOP_K: usize = 10;

    let mut group = c.benchmark_group("search_by_size");
    for &n in &[100usize, 1_000, 10_000] {
        let index = build_index(n, DIM, Metric::Cosine);
        let query = gen_vec(99999, DIM);
        let ef = index.params().ef_search;

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| black_box(index.search(black_box(&query), TOP_K, ef).unwrap()));
        });
    }
    group.finish();
}

// ── Search by Vector Dimension ────────────────────────────────────────────────

fn bench_search_by_dim(c: &mut Criterion) {
    const N: usize = 1_000;
    const TOP_K: usize = 10;

    let mut group = c.benchmark_group("search_by_dim");
    for &dim in &[32usize, 128, 512] {
        let index = build_index(N, dim, Metric::Cosine);
        let query = gen_vec(42, dim);
        let ef = index.params().ef_search;

        group.throughput(Throughput::Elements(dim as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dim), &dim, |b, _| {
            b.iter(|| black_box(index.search(black_box(&query), TOP_K, ef).unwrap()));
        });
    }
    group.finish();
}

// ── Search by Top-K ───────────────────────────────────────────────────────────

fn bench_search_by_topk(c: &mut Criterion) {
    const DIM: usize = 128;
    const N: usize = 5_000;

    let index = build_index(N, DIM, Metric::Cosine);
    let query = gen_vec(777, DIM);

    let mut group = c.benchmark_group("search_topk");
    for &k in &[1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, &k| {
            b.iter(|| black_box(index.search(black_box(&query), k, k.max(64)).unwrap()));
        });
    }
    group.finish();
}

// ── Metric Comparison ─────────────────────────────────────────────────────────

fn bench_search_by_metric(c: &mut Criterion) {
    const DIM: usize = 128;
    const N: usize = 2_000;
    const TOP_K: usize = 10;

    let mut group = c.benchmark_group("search_by_metric");
    for metric in [Metric::Cosine, Metric::Euclidean, Metric::DotProduct] {
        let index = build_index(N, DIM, metric);
        let query = gen_vec(55, DIM);

        group.bench_with_input(BenchmarkId::from_parameter(metric), &metric, |b, _| {
            b.iter(|| black_box(index.search(black_box(&query), TOP_K, 64).unwrap()));
        });
    }
    group.finish();
}

fn bench_exact_search(c: &mut Criterion) {
    const DIM: usize = 128;
    let index = build_index(1_000, DIM, Metric::Cosine);
    let query = gen_vec(5, DIM);

    c.bench_function("exact_search_1k", |b| {
        b.iter(|| black_box(index.exact_search(black_box(&query), 10).unwrap()));
    });
}

// ── Insert Benchmarks ─────────────────────────────────────────────────────────

fn bench_insert_batch_1k(c: &mut Criterion) {
    const DIM: usize = 128;
    const BATCH: usize = 1_000;

    c.bench_function("insert_batch_1k", |b| {
        b.iter_batched(
            || {
                let index = HnswIndex::new(DIM, Metric::Cosine, HnswParams::default().seeded(1));
                let vecs: Vec<(RecordId, Vec<f32>)> = (0..BATCH)
                    .map(|i| (RecordId::from(uuid::Uuid::new_v4()), gen_vec(i as u64, DIM)))
                    .collect();
                (index, vecs)
            },
            |(mut index, vecs)| {
                for (id, v) in vecs {
                    index.insert(id, &v).unwrap();
                }
                black_box(index)
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

// ── Collection Query ──────────────────────────────────────────────────────────

fn bench_filtered_query(c: &mut Criterion) {
    const DIM: usize = 64;
    const N: usize = 5_000;

    let manager = CollectionManager::in_memory(HoundConfig::default());
    let dogs = manager
        .create(
            CollectionSpec::new("Dog", DIM)
                .attribute(Attribute::new("weight", DataType::Number))
                .index(HnswParams::default().seeded(3)),
        )
        .unwrap();
    let batch = (0..N)
        .map(|i| NewRecord::new(gen_vec(i as u64, DIM)).with("weight", (i % 120) as f64))
        .collect();
    dogs.insert_many(batch);

    let request = QueryRequest::new(gen_vec(4242, DIM), 10)
        .filter(Predicate::field("weight").less_than(60.0));

    c.bench_function("filtered_query", |b| {
        b.iter(|| black_box(dogs.query(black_box(&request)).unwrap()));
    });
}

// ── Raw Math ──────────────────────────────────────────────────────────────────

fn bench_cosine_raw(c: &mut Criterion) {
    const DIM: usize = 128;
    let a = gen_vec(1, DIM);
    let b = gen_vec(2, DIM);

    c.bench_function("cosine_similarity_raw_128d", |b_fn| {
        b_fn.iter(|| black_box(cosine_similarity(black_box(&a), black_box(&b))));
    });
}

// ── Criterion Groups ──────────────────────────────────────────────────────────

criterion_group!(
    benches,
    bench_search_by_size,
    bench_search_by_dim,
    bench_search_by_topk,
    bench_search_by_metric,
    bench_exact_search,
    bench_insert_batch_1k,
    bench_filtered_query,
    bench_cosine_raw,
);

criterion_main!(benches);
