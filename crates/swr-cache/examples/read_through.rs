//! Read-Through Example
//!
//! Demonstrates the five-tier read pipeline against the in-memory store:
//! a first read fills through the loader, later reads hit fresh, and
//! invalidation empties the subtree.

use std::time::Duration;

use async_trait::async_trait;
use swr_cache::prelude::*;

struct ProductLoader;

#[async_trait]
impl Loader for ProductLoader {
    type Value = String;

    async fn resolve(&self, key: &Key) -> Result<String> {
        // stand-in for a database or upstream service call
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(format!("product #{} (from source)", key.id_string()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let policy = GetPolicy::new(Duration::from_secs(60), Duration::from_secs(10))?;
    let engine = CacheEngine::with_config(
        MemoryStore::with_defaults(),
        ProductLoader,
        EngineConfig::with_policy(policy),
    );

    println!("=== Read-Through Demo ===\n");

    let key = Key::new("product", "item", Some("v2".into()), None, "12345")?;

    // First read: the engine wins the lock and fills through the loader
    match engine.get(&key).await? {
        ValueResult::Hit { value, .. } => println!("first read:  HIT  - {value}"),
        ValueResult::Stale { value, .. } => println!("first read:  STALE - {value}"),
        ValueResult::Miss => println!("first read:  MISS"),
    }

    // Second read: straight fresh hit, no loader involved
    match engine.get(&key).await? {
        ValueResult::Hit { value, .. } => println!("second read: HIT  - {value}"),
        other => println!("second read: {other:?}"),
    }

    // Batched reads share one store round-trip for the fresh probe
    let keys = [
        key.clone(),
        Key::new("product", "item", Some("v2".into()), None, "67890")?,
    ];
    let results = engine.get_many(&keys).await;
    println!("batch read:  {} entries resolved", results.len());

    // Drop the whole product/item/v2 subtree
    let prefix = KeyPrefix::new("product", "item", Some("v2".into()), None)?;
    let removed = engine.bump_namespace(&prefix).await?;
    println!("invalidated: {removed} entries under {prefix}");

    match engine.get(&key).await? {
        ValueResult::Hit { value, .. } => println!("after clear: refilled - {value}"),
        other => println!("after clear: {other:?}"),
    }

    Ok(())
}
