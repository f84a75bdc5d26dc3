//! Remote store abstraction
//!
//! [`StoreAdapter`] is the engine's only window onto the shared key-value
//! store. Reads are mode-driven: the same row answers differently depending
//! on whether the caller wants precompute-window semantics, the previous
//! value during a rebuild, or a bounded wait for another process's save.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CacheError, Result};
use crate::types::StoredEntry;

/// Maximum lock TTL adapters accept; anything longer risks wedging a key
pub const MAX_LOCK_TTL: Duration = Duration::from_secs(300);

/// Tag prepended to a payload key to form its lock key
///
/// Locks live in a distinct namespace so a prefix clear of payload rows can
/// never delete a live lock.
pub const LOCK_TAG: &str = "sp/";

/// Derive the lock key for a payload key
pub fn lock_key_for(key: &str) -> String {
    format!("{LOCK_TAG}{key}")
}

/// Validate a lock TTL against the `(0, MAX_LOCK_TTL]` bound
pub fn validate_lock_ttl(ttl: Duration) -> Result<()> {
    if ttl.is_zero() || ttl > MAX_LOCK_TTL {
        return Err(CacheError::invalid(format!(
            "lock ttl must be in (0, {}s], got {ttl:?}",
            MAX_LOCK_TTL.as_secs()
        )));
    }
    Ok(())
}

/// How a read interprets the stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Report a hit only while `now < hard_expires_at - soft`; the payload
    /// stays visible up to hard expiry so the caller can decide to rebuild
    Precompute { soft: Duration },
    /// Return the previously stored payload even while another process holds
    /// the rebuild lock, for as long as the row is physically retained
    Old,
    /// Poll for a fresh value, pausing `pause` between attempts, bounded by
    /// `max_attempts`
    Sleep { pause: Duration, max_attempts: u32 },
}

/// Result of one mode-driven read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemView {
    entry: Option<StoredEntry>,
    hit: bool,
}

impl ItemView {
    /// A view with no row behind it
    pub fn missing() -> Self {
        Self {
            entry: None,
            hit: false,
        }
    }

    pub fn of(entry: StoredEntry, hit: bool) -> Self {
        Self {
            entry: Some(entry),
            hit,
        }
    }

    /// Whether the mode's hit condition held at read time
    pub fn is_hit(&self) -> bool {
        self.hit
    }

    pub fn entry(&self) -> Option<&StoredEntry> {
        self.entry.as_ref()
    }

    pub fn into_entry(self) -> Option<StoredEntry> {
        self.entry
    }
}

/// Scoped per-key lock
///
/// Dropping the guard releases the lock on every exit path; `release`
/// makes the release explicit. The store-side TTL remains the backstop for
/// processes that die while holding a lock.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    /// Wrap a release action supplied by the adapter
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Release the lock now
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Operations the engine needs from a remote key-value store
///
/// Implementations treat the store as a single logical endpoint with per-key
/// lock primitives and TTL expiry. Transient I/O retries are the adapter's
/// own business; the engine never retries and treats an error as "no data in
/// this tier".
#[async_trait]
pub trait StoreAdapter: Send + Sync + 'static {
    /// Read one key under the given mode
    async fn read(&self, key: &str, mode: ReadMode) -> Result<ItemView>;

    /// Read several keys under the same mode, preserving input order
    async fn read_many(&self, keys: &[&str], mode: ReadMode) -> Result<Vec<ItemView>>;

    /// Try to take the per-key rebuild lock with `SET NX EX` semantics
    ///
    /// Returns `None` when another holder exists. The TTL must satisfy
    /// [`validate_lock_ttl`]. At most one live guard exists per key.
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>>;

    /// Persist an entry with the given hard TTL
    async fn save(&self, key: &str, entry: StoredEntry, ttl: Duration) -> Result<()>;

    /// Remove exactly one entry; returns whether it existed
    async fn delete_exact(&self, key: &str) -> Result<bool>;

    /// Remove several entries; returns how many existed
    async fn delete_many(&self, keys: &[&str]) -> Result<u64>;

    /// Remove every entry whose key starts with the prefix; returns the count
    async fn clear_by_prefix(&self, prefix: &str) -> Result<u64>;

    /// Whether a live (not hard-expired) entry exists
    async fn contains(&self, key: &str) -> Result<bool>;
}
