//! swr-cache-storage: Store adapters for swr-cache
//!
//! Concrete [`StoreAdapter`](swr_cache_core::StoreAdapter) implementations:
//! a DashMap-backed in-process store (tests, single-node deployments) and a
//! Redis-backed store for multi-process sharing.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryConfig, MemoryStore};

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisStore};
