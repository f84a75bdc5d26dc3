//! Redis Store Example
//!
//! Run with: cargo run --example redis_store --features redis
//! Requires a Redis server at redis://127.0.0.1:6379
//!
//! Demonstrates cross-process invalidation: events published to the store's
//! pub/sub channel are decoded by every subscribed process, whose worker
//! then applies the synchronous counterpart locally.

use std::time::Duration;

use async_trait::async_trait;
use swr_cache::prelude::*;

struct SessionLoader;

#[async_trait]
impl Loader for SessionLoader {
    type Value = String;

    async fn resolve(&self, key: &Key) -> Result<String> {
        Ok(format!("session data for {}", key.id_string()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let store = RedisStore::new(RedisConfig::new("redis://127.0.0.1:6379").prefix("demo")).await?;

    let policy = GetPolicy::new(Duration::from_secs(300), Duration::from_secs(30))?;
    let engine = CacheEngine::with_config(
        store.clone(),
        SessionLoader,
        EngineConfig::with_policy(policy),
    );

    // every process sharing the store runs a worker off the same channel
    let events = store.subscribe_events().await?;
    tokio::spawn(InvalidationWorker::from_receiver(events).run(engine.clone()));

    println!("=== Redis Store Demo ===\n");

    let key = Key::new("session", "active", None, Some("en-US".into()), "user-42")?;

    match engine.get(&key).await? {
        ValueResult::Hit { value, created_at, .. } => {
            println!("HIT   - {value} (created at {created_at})")
        }
        ValueResult::Stale { value, .. } => println!("STALE - {value}"),
        ValueResult::Miss => println!("MISS"),
    }

    // broadcast a refresh; each subscriber re-resolves the key
    store
        .publish_event(&InvalidationEvent::Refresh(key.clone()))
        .await?;
    println!("refresh published");

    tokio::time::sleep(Duration::from_millis(200)).await;

    engine
        .invalidate_exact(&key, InvalidateMode::DeleteSync)
        .await?;
    println!("entry removed");

    Ok(())
}
