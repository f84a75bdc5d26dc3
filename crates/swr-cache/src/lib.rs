//! swr-cache: Stale-while-revalidate caching with single-flight coordination
//!
//! # Features
//!
//! - **Five-tier reads**: fresh hit, leader compute, serve-stale,
//!   bounded wait, fail-open
//! - **Single-flight fills**: a store-backed per-key lock admits one
//!   recomputation at a time across processes
//! - **Hierarchical keys** with exact and prefix-scoped invalidation,
//!   synchronous or event-dispatched
//! - **Deterministic TTL jitter** to desynchronize expirations
//! - **Pluggable serialization and metrics**
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use swr_cache::prelude::*;
//!
//! struct ProductLoader;
//!
//! #[async_trait]
//! impl Loader for ProductLoader {
//!     type Value = String;
//!
//!     async fn resolve(&self, key: &Key) -> Result<String> {
//!         Ok(format!("product #{}", key.id_string()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store = MemoryStore::with_defaults();
//!     let cache = CacheEngine::new(store, ProductLoader);
//!
//!     let key = Key::new("product", "item", Some("v2".into()), None, "12345")?;
//!     match cache.get(&key).await? {
//!         ValueResult::Hit { value, .. } => println!("fresh: {value}"),
//!         ValueResult::Stale { value, .. } => println!("stale: {value}"),
//!         ValueResult::Miss => println!("miss"),
//!     }
//!     Ok(())
//! }
//! ```

mod engine;

// Re-export core
pub use swr_cache_core::*;

// Re-export storage
#[cfg(feature = "memory")]
pub use swr_cache_storage::{MemoryConfig, MemoryStore};

#[cfg(feature = "redis")]
pub use swr_cache_storage::{RedisConfig, RedisStore};

// Export engine
pub use engine::{CacheEngine, EngineConfig};
pub use engine::{InvalidationQueue, InvalidationWorker, invalidation_channel};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CacheEngine, CacheError, EngineConfig, FailMode, GetPolicy, Id, InvalidateMode,
        InvalidatePolicy, InvalidationEvent, InvalidationQueue, InvalidationWorker, Key,
        KeyBuilder, KeyPrefix, Loader, PayloadFormat, RefreshMode, Result, Selector, TtlJitter,
        ValueResult, invalidation_channel,
    };

    #[cfg(feature = "memory")]
    pub use crate::{MemoryConfig, MemoryStore};

    #[cfg(feature = "redis")]
    pub use crate::{RedisConfig, RedisStore};
}

#[cfg(test)]
mod tests;
