// houndb - main.rs
// Binary entry point: inspect a storage root, run the dog demo, benchmark.

use std::env;
use std::time::Instant;

use anyhow::{bail, Context};

use houndb::{
    Attribute, CollectionManager, CollectionSpec, DataType, Embedder, HashingEmbedder,
    HnswIndex, HnswParams, HoundConfig, Metric, NewRecord, ParsedEmbedder, Predicate,
    QueryRequest, RecordId,
};

/// Weights in pounds, keyed by breed; unknown breeds default to 50.
const DOG_WEIGHTS: &[(&str, f64)] = &[
    ("Australian Shepherd", 52.0),
    ("Bernese Mountain Dog", 94.0),
    ("Corgi", 26.0),
    ("French Bulldog", 22.0),
    ("German Shepherd", 68.0),
    ("Golden Retriever", 70.0),
    ("Goldendoodle", 40.0),
    ("Labrador Retriever", 67.0),
    ("Rottweiler", 103.0),
    ("Siberian Husky", 47.0),
];

const DEMO_DIM: usize = 64;

fn main() {
    // Load .env if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Respects RUST_LOG
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mode = args.get(1).map(|s| s.as_str()).unwrap_or("run");

    let outcome = match mode {
        "run" => run(),
        "demo" => run_demo(),
        "query" => run_query(&args[2..]),
        "bench" => run_bench(),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        unknown => {
            eprintln!("[houndb] Unknown mode: '{}'. Try --help.", unknown);
            std::process::exit(1);
        }
    };

    if let Err(e) = outcome {
        eprintln!("[houndb] error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = HoundConfig::from_env()?;
    log::info!(
        "Config: storage={:?}, metric={}, m={}, ef_search={}",
        config.storage_path,
        config.metric,
        config.hnsw.m,
        config.hnsw.ef_search
    );

    let manager = CollectionManager::open(config)?;
    let names = manager.list()?;
    if names.is_empty() {
        println!("[houndb] no collections (try `houndb demo`)");
        return Ok(());
    }

    println!("\n[houndb] Collections:");
    for name in names {
        let stats = manager.get(&name)?.stats()?;
        println!(
            "  {:16} {:?}  records={:<6} blobs={:<6} dim={:<5} metric={:9} levels={}",
            stats.name,
            stats.status,
            stats.records,
            stats.blobs,
            stats.vector_dim,
            stats.metric,
            stats.index.max_level + 1
        );
    }
    manager.checkpoint()?;
    Ok(())
}

/// Rebuilds the `Dog` collection from a fixed breed list, with hashed
/// "images" standing in for real photos and a real vision model.
fn run_demo() -> anyhow::Result<()> {
    let config = HoundConfig::from_env()?;
    let manager = CollectionManager::open(config)?;
    let embedder = HashingEmbedder::new(DEMO_DIM);

    if manager.drop_if_exists("Dog")? {
        log::info!("Dropped existing Dog collection");
    }
    let dogs = manager.create(
        CollectionSpec::new("Dog", embedder.dim())
            .metric(Metric::Cosine)
            .attribute(Attribute::new("breed", DataType::Text).required().describe("name of dog breed"))
            .attribute(Attribute::new("image", DataType::Blob).describe("image"))
            .attribute(Attribute::new("filepath", DataType::Text).describe("the filepath of the image")),
    )?;
    dogs.add_attribute(Attribute::new("weight", DataType::Number).describe("weight in pounds"))?;

    let mut batch = Vec::with_capacity(DOG_WEIGHTS.len());
    for (breed, weight) in DOG_WEIGHTS {
        let filepath = format!("{}.jpg", breed.replace(' ', "-"));
        let pixels = format!("{breed} photo {filepath}").into_bytes();
        let image = dogs.put_blob(&pixels)?;
        batch.push(
            NewRecord::new(embedder.embed(&pixels)?)
                .with("breed", *breed)
                .with("image", image)
                .with("filepath", filepath)
                .with("weight", *weight),
        );
    }
    let result = dogs.insert_many(batch);
    println!("[houndb] Inserted {} dogs ({} failed)", result.inserted.len(), result.failed.len());
    for failure in &result.failed {
        println!("  #{} => {}", failure.index, failure.error);
    }

    let upload = b"Labrador Retriever photo Labrador-Retriever.jpg";
    println!("\n[houndb] Dogs most similar to the uploaded Labrador photo:");
    for hit in dogs.query_near(&embedder, upload, 3, None)? {
        println!("  {:22} score={:.4}", property(&hit.properties, "breed"), hit.score);
    }

    println!("\n[houndb] Dogs found under 60 pounds:");
    for dog in dogs.fetch(Some(Predicate::field("weight").less_than(60.0)), None)? {
        println!("  {}", serde_json::to_string(&dog.properties)?);
    }

    let cleared = dogs.delete_by_predicate(Predicate::field("breed").not_equals("x"))?;
    println!("\n[houndb] Cleared {} dogs; collection empty: {}", cleared, dogs.is_empty()?);
    let compacted = dogs.compact()?;
    println!("[houndb] Compaction removed {} blobs", compacted.blobs_removed);
    Ok(())
}

/// `houndb query <collection> <k> <vector>`, vector as JSON or plain numbers.
fn run_query(args: &[String]) -> anyhow::Result<()> {
    let (name, k, vector) = match args {
        [name, k, rest @ ..] if !rest.is_empty() => (name, k, rest.join(" ")),
        _ => bail!("usage: houndb query <collection> <k> <vector>"),
    };
    let k: usize = k.parse().with_context(|| format!("k must be a number, got {k:?}"))?;

    let manager = CollectionManager::open(HoundConfig::from_env()?)?;
    let collection = manager.get(name)?;
    let embedder = ParsedEmbedder::new(collection.vector_dim());
    let hits = collection.query_near(&embedder, vector.as_bytes(), k, None)?;

    for hit in hits {
        println!("{}", serde_json::to_string(&hit)?);
    }
    Ok(())
}

fn run_bench() -> anyhow::Result<()> {
    const DIM: usize = 128;
    const N: usize = 10_000;
    const QUERIES: usize = 100;
    const K: usize = 10;

    println!("[houndb] Running internal benchmark...");

    let vector = |i: usize| -> Vec<f32> { (0..DIM).map(|j| ((i * 31 + j * 7) as f32).sin()).collect() };

    let mut index = HnswIndex::new(DIM, Metric::Cosine, HnswParams::default().seeded(7));
    let ids: Vec<RecordId> = (0..N).map(|_| RecordId::from(uuid::Uuid::new_v4())).collect();

    let t0 = Instant::now();
    for (i, id) in ids.iter().enumerate() {
        index.insert(*id, &vector(i))?;
    }
    println!("  Inserted {} vectors in {}ms", N, t0.elapsed().as_millis());

    let mut found = 0usize;
    let mut search_us = 0u128;
    for q in 0..QUERIES {
        let query = vector(N + q * 13);
        let t1 = Instant::now();
        let approx = index.search(&query, K, index.params().ef_search)?;
        search_us += t1.elapsed().as_micros();
        let exact = index.exact_search(&query, K)?;
        found += approx.iter().filter(|(id, _)| exact.iter().any(|(e, _)| e == id)).count();
    }
    println!("  Search (top-{}) in {}μs avg", K, search_us / QUERIES as u128);
    println!("  Recall@{}: {:.3}", K, found as f64 / (QUERIES * K) as f64);

    let stats = index.stats();
    println!("  Levels: {}, edges: {}", stats.max_level + 1, stats.edges);
    Ok(())
}

fn property<'a>(properties: &'a houndb::record::Properties, name: &str) -> &'a str {
    properties.get(name).and_then(|v| v.as_text()).unwrap_or("")
}

fn print_help() {
    println!(
        r#"
houndb: embedded vector collection store with HNSW search

USAGE:
  houndb [MODE]

MODES:
  run                          List collections and their stats (default)
  demo                         Rebuild the Dog collection and run sample queries
  query <collection> <k> <v>   k-NN query; <v> as JSON array or plain numbers
  bench                        Run internal index benchmark
  help                         Show this message

ENVIRONMENT:
  HOUNDB_STORAGE_PATH      Storage root (default: ./data)
  HOUNDB_METRIC            cosine | euclidean | dot (default: cosine)
  HOUNDB_M                 HNSW max neighbors per node (default: 16)
  HOUNDB_EF_CONSTRUCTION   HNSW build beam width (default: 200)
  HOUNDB_EF_SEARCH         HNSW search beam width (default: 64)
  HOUNDB_LOCK_TIMEOUT_MS   Max lock wait before Busy (default: 2000)
  HOUNDB_OVERFETCH         Filtered-query candidate multiplier (default: 4)
  RUST_LOG                 Log level: info | debug | warn | error
"#
    );
}
