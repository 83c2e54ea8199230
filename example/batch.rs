// houndb - example/batch.rs
// Demonstrates batch insert with per-record error reporting.

use houndb::{Attribute, CollectionManager, CollectionSpec, DataType, HoundConfig, NewRecord};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let manager = CollectionManager::in_memory(HoundConfig::default());
    let dogs = manager.create(
        CollectionSpec::new("Dog", 3).attribute(Attribute::new("breed", DataType::Text).required()),
    )?;

    let items = vec![
        NewRecord::new(vec![1.0, 0.0, 0.0]).with("breed", "Corgi"),
        NewRecord::new(vec![0.0, 1.0, 0.0]).with("breed", "Siberian Husky"),
        NewRecord::new(vec![0.0, 0.0, 1.0]).with("breed", "Rottweiler"),
        // Wrong dim: will fail
        NewRecord::new(vec![1.0, 2.0]).with("breed", "Pug"),
        // Missing required breed: will fail
        NewRecord::new(vec![0.5, 0.5, 0.0]),
    ];

    let result = dogs.insert_many(items);

    println!("Inserted: {}", result.inserted.len());
    println!("Failed:   {}", result.failed.len());
    for failure in &result.failed {
        println!("  #{} => {}", failure.index, failure.error);
    }
    Ok(())
}
