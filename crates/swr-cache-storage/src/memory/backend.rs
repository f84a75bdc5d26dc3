//! In-memory store adapter using DashMap
//!
//! Shares the remote store's observable semantics (mode-driven reads, lock
//! keys with TTL, grace retention past hard expiry) so the engine behaves
//! identically against it, which makes it the reference store for tests and
//! a usable store for single-process deployments.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use swr_cache_core::{
    Clock, ItemView, LockGuard, ReadMode, Result, StoreAdapter, StoredEntry, SystemClock,
    UnixSeconds, lock_key_for, validate_lock_ttl,
};

/// Configuration for the memory store
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// How long a row is physically retained past its hard expiry so
    /// followers can serve stale while a leader rebuilds
    pub grace: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(600),
        }
    }
}

impl MemoryConfig {
    /// Create config with a specific grace window
    pub fn with_grace(grace: Duration) -> Self {
        Self { grace }
    }
}

#[derive(Debug, Clone)]
struct StoredRow {
    entry: StoredEntry,
    physical_expires_at: UnixSeconds,
}

#[derive(Debug, Clone, Copy)]
struct LockRow {
    expires_at: UnixSeconds,
    token: u64,
}

/// In-memory store adapter
///
/// Cloning creates a new handle to the SAME underlying store, so several
/// engines in one process share entries and locks the way several processes
/// share one Redis.
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<DashMap<String, StoredRow>>,
    locks: Arc<DashMap<String, LockRow>>,
    next_token: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
    config: MemoryConfig,
}

impl MemoryStore {
    /// Create a store on the system clock
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(MemoryConfig::default())
    }

    /// Create a store driven by an injected clock (deterministic tests)
    pub fn with_clock(config: MemoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            next_token: Arc::new(AtomicU64::new(1)),
            clock,
            config,
        }
    }

    /// Number of physically present rows (including grace-retained ones)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fetch a row, dropping it if its physical retention has lapsed
    fn row(&self, key: &str, now: UnixSeconds) -> Option<StoredEntry> {
        let expired = match self.data.get(key) {
            Some(row) if now < row.physical_expires_at => return Some(row.entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.data.remove(key);
        }
        None
    }

    fn lock_held(&self, lock_key: &str, now: UnixSeconds) -> bool {
        match self.locks.get(lock_key) {
            Some(row) => now < row.expires_at,
            None => false,
        }
    }

    async fn read_sleeping(
        &self,
        key: &str,
        pause: Duration,
        max_attempts: u32,
    ) -> Result<ItemView> {
        let lock_key = lock_key_for(key);
        let mut attempt = 0;
        loop {
            let now = self.clock.now_secs();
            if let Some(entry) = self.row(key, now) {
                if entry.is_live(now) {
                    return Ok(ItemView::of(entry, true));
                }
            }
            // once the lock is gone a fresh value is no longer coming
            if attempt > 0 && !self.lock_held(&lock_key, now) {
                break;
            }
            if attempt >= max_attempts {
                break;
            }
            attempt += 1;
            tokio::time::sleep(pause).await;
        }

        let now = self.clock.now_secs();
        Ok(match self.row(key, now) {
            Some(entry) => {
                let live = entry.is_live(now);
                ItemView::of(entry, live)
            }
            None => ItemView::missing(),
        })
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn read(&self, key: &str, mode: ReadMode) -> Result<ItemView> {
        match mode {
            ReadMode::Precompute { soft } => {
                let now = self.clock.now_secs();
                Ok(match self.row(key, now) {
                    // past hard expiry the row is only visible to Old reads
                    Some(entry) if entry.is_live(now) => {
                        let fresh = entry.is_fresh(now, soft);
                        ItemView::of(entry, fresh)
                    }
                    _ => ItemView::missing(),
                })
            }
            ReadMode::Old => {
                let now = self.clock.now_secs();
                Ok(match self.row(key, now) {
                    Some(entry) => {
                        let live = entry.is_live(now);
                        ItemView::of(entry, live)
                    }
                    None => ItemView::missing(),
                })
            }
            ReadMode::Sleep {
                pause,
                max_attempts,
            } => self.read_sleeping(key, pause, max_attempts).await,
        }
    }

    async fn read_many(&self, keys: &[&str], mode: ReadMode) -> Result<Vec<ItemView>> {
        let mut views = Vec::with_capacity(keys.len());
        for key in keys {
            views.push(self.read(key, mode).await?);
        }
        Ok(views)
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        validate_lock_ttl(ttl)?;

        let lock_key = lock_key_for(key);
        let now = self.clock.now_secs();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let row = LockRow {
            expires_at: now + ttl.as_secs(),
            token,
        };

        let acquired = match self.locks.entry(lock_key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if now < occupied.get().expires_at {
                    false
                } else {
                    // expired holder; take over
                    occupied.insert(row);
                    true
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(row);
                true
            }
        };

        if !acquired {
            return Ok(None);
        }

        let locks = Arc::clone(&self.locks);
        Ok(Some(LockGuard::new(move || {
            locks.remove_if(&lock_key, |_, held| held.token == token);
        })))
    }

    async fn save(&self, key: &str, entry: StoredEntry, ttl: Duration) -> Result<()> {
        let now = self.clock.now_secs();
        let physical_expires_at = now + ttl.as_secs() + self.config.grace.as_secs();
        self.data.insert(
            key.to_string(),
            StoredRow {
                entry,
                physical_expires_at,
            },
        );
        Ok(())
    }

    async fn delete_exact(&self, key: &str) -> Result<bool> {
        Ok(self.data.remove(key).is_some())
    }

    async fn delete_many(&self, keys: &[&str]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            if self.delete_exact(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear_by_prefix(&self, prefix: &str) -> Result<u64> {
        let matching: Vec<String> = self
            .data
            .iter()
            .filter(|row| row.key().starts_with(prefix))
            .map(|row| row.key().clone())
            .collect();

        let refs: Vec<&str> = matching.iter().map(String::as_str).collect();
        self.delete_many(&refs).await
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let now = self.clock.now_secs();
        Ok(self.row(key, now).is_some_and(|entry| entry.is_live(now)))
    }
}
