// houndb - example/dogs.rs
// Insert a handful of dogs, then search by similarity and by attribute.
// Run with:  cargo run --example dogs

use houndb::{
    Attribute, CollectionManager, CollectionSpec, DataType, HoundConfig, Metric, NewRecord,
    Predicate, QueryRequest,
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("── houndb Dogs Example ───────────────────────");

    let manager = CollectionManager::in_memory(HoundConfig::default());
    let dogs = manager.create(
        CollectionSpec::new("Dog", 4)
            .metric(Metric::Cosine)
            .attribute(Attribute::new("breed", DataType::Text).required())
            .attribute(Attribute::new("weight", DataType::Number)),
    )?;

    // Hand-made "embeddings": herding dogs in dims 0-1, retrievers in 2-3.
    let records = vec![
        ("Corgi", 26.0, vec![0.9, 0.1, 0.0, 0.0]),
        ("Australian Shepherd", 52.0, vec![0.8, 0.2, 0.0, 0.0]),
        ("Golden Retriever", 70.0, vec![0.0, 0.0, 0.9, 0.1]),
        ("Labrador Retriever", 67.0, vec![0.0, 0.0, 0.8, 0.2]),
        ("Goldendoodle", 40.0, vec![0.5, 0.0, 0.5, 0.0]),
    ];
    for (breed, weight, vector) in records {
        dogs.insert(NewRecord::new(vector).with("breed", breed).with("weight", weight))?;
    }
    println!("Inserted {} dogs.\n", dogs.len()?);

    let query = vec![0.95, 0.05, 0.0, 0.0];
    println!("Top-3 for {:?}:", query);
    for hit in dogs.query(&QueryRequest::new(query.clone(), 3))? {
        println!("  {:22} score={:.4}", hit.properties["breed"], hit.score);
    }
    println!("\nExpected: Corgi, Australian Shepherd, Goldendoodle (in that order)");

    println!("\nTop-2 heavier than 45 lb:");
    let heavy = QueryRequest::new(query, 2).filter(Predicate::field("weight").greater_than(45.0));
    for hit in dogs.query(&heavy)? {
        println!("  {:22} weight={}", hit.properties["breed"], hit.properties["weight"]);
    }

    let removed = dogs.delete_by_predicate(Predicate::field("breed").contains("Retriever"))?;
    println!("\nDeleted {} retrievers. Collection size: {}", removed, dogs.len()?);

    println!("\n── Done ──────────────────────────────────────");
    Ok(())
}
