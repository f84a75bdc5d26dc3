//! Redis store adapter
//!
//! Rows are `StoredEntry` envelopes serialized as JSON under `SET ... EX`
//! with a physical TTL of hard TTL + grace, so `ReadMode::Old` can serve a
//! stale row while a leader rebuilds. Rebuild locks are plain `SET NX EX`
//! keys in the `sp/` namespace; guard release goes through a reaper task
//! because dropping a guard is synchronous. Invalidation events travel to
//! other processes over a pub/sub channel in their wire encoding
//! ([`InvalidationEvent::to_message`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;

use swr_cache_core::{
    CacheError, Clock, InvalidationEvent, ItemView, LockGuard, ReadMode, Result, StoreAdapter,
    StoredEntry, SystemClock, lock_key_for, validate_lock_ttl,
};

use super::config::RedisConfig;

/// Redis store adapter
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool<RedisConnectionManager>,
    config: RedisConfig,
    clock: Arc<dyn Clock>,
    next_token: Arc<AtomicU64>,
    release_tx: mpsc::UnboundedSender<(String, String)>,
}

impl RedisStore {
    /// Create a new Redis store on the system clock
    pub async fn new(config: RedisConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Create a store whose mode evaluation runs on an injected clock
    pub async fn with_clock(config: RedisConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let (release_tx, release_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_lock_reaper(pool.clone(), release_rx));

        Ok(Self {
            pool,
            config,
            clock,
            next_token: Arc::new(AtomicU64::new(1)),
            release_tx,
        })
    }

    /// Get prefix for a key
    fn prefixed_key(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    /// Get connection from pool
    async fn get_connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))
    }

    /// Broadcast an invalidation event to every process on the channel
    pub async fn publish_event(&self, event: &InvalidationEvent) -> Result<()> {
        let mut conn = self.get_connection().await?;
        redis::cmd("PUBLISH")
            .arg(&self.config.invalidation_channel)
            .arg(event.to_message())
            .query_async::<i64>(&mut *conn)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Subscribe to the invalidation channel
    ///
    /// Returns a receiver of decoded events; unknown or malformed messages
    /// are dropped. The subscription runs on its own connection (pub/sub
    /// takes a connection out of request/response mode) and ends when the
    /// receiver is dropped.
    pub async fn subscribe_events(&self) -> Result<mpsc::UnboundedReceiver<InvalidationEvent>> {
        let client = redis::Client::open(self.config.url.as_str())
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        pubsub
            .subscribe(&self.config.invalidation_channel)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(_e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            target: "swr_cache",
                            error = %_e,
                            "undecodable pub/sub payload dropped"
                        );
                        continue;
                    }
                };
                match InvalidationEvent::from_message(&payload) {
                    Some(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    None => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            target: "swr_cache",
                            message = %payload,
                            "unknown invalidation message dropped"
                        );
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn fetch_entry(&self, key: &str) -> Result<Option<StoredEntry>> {
        let mut conn = self.get_connection().await?;
        let prefixed = self.prefixed_key(key);

        let bytes: Option<Vec<u8>> = conn
            .get(&prefixed)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;

        bytes
            .map(|data| {
                serde_json::from_slice(&data)
                    .map_err(|e| CacheError::Deserialization(e.to_string()))
            })
            .transpose()
    }

    async fn lock_held(&self, lock_key: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        conn.exists(lock_key)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))
    }

    async fn read_sleeping(
        &self,
        key: &str,
        pause: Duration,
        max_attempts: u32,
    ) -> Result<ItemView> {
        let lock_key = self.prefixed_key(&lock_key_for(key));
        let mut attempt = 0;
        loop {
            let now = self.clock.now_secs();
            if let Some(entry) = self.fetch_entry(key).await? {
                if entry.is_live(now) {
                    return Ok(ItemView::of(entry, true));
                }
            }
            // once the lock is gone a fresh value is no longer coming
            if attempt > 0 && !self.lock_held(&lock_key).await? {
                break;
            }
            if attempt >= max_attempts {
                break;
            }
            attempt += 1;
            tokio::time::sleep(pause).await;
        }

        let now = self.clock.now_secs();
        Ok(match self.fetch_entry(key).await? {
            Some(entry) => {
                let live = entry.is_live(now);
                ItemView::of(entry, live)
            }
            None => ItemView::missing(),
        })
    }

    fn view_for(&self, entry: Option<StoredEntry>, mode: ReadMode) -> ItemView {
        let now = self.clock.now_secs();
        match (mode, entry) {
            (ReadMode::Precompute { soft }, Some(entry)) if entry.is_live(now) => {
                let fresh = entry.is_fresh(now, soft);
                ItemView::of(entry, fresh)
            }
            (ReadMode::Precompute { .. }, _) => ItemView::missing(),
            (ReadMode::Old, Some(entry)) => {
                let live = entry.is_live(now);
                ItemView::of(entry, live)
            }
            (ReadMode::Old, None) => ItemView::missing(),
            // Sleep never reaches here; read() dispatches it to the poll loop
            (ReadMode::Sleep { .. }, Some(entry)) => {
                let live = entry.is_live(now);
                ItemView::of(entry, live)
            }
            (ReadMode::Sleep { .. }, None) => ItemView::missing(),
        }
    }
}

#[async_trait]
impl StoreAdapter for RedisStore {
    async fn read(&self, key: &str, mode: ReadMode) -> Result<ItemView> {
        match mode {
            ReadMode::Sleep {
                pause,
                max_attempts,
            } => self.read_sleeping(key, pause, max_attempts).await,
            _ => {
                let entry = self.fetch_entry(key).await?;
                Ok(self.view_for(entry, mode))
            }
        }
    }

    async fn read_many(&self, keys: &[&str], mode: ReadMode) -> Result<Vec<ItemView>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        if matches!(mode, ReadMode::Sleep { .. }) {
            let mut views = Vec::with_capacity(keys.len());
            for key in keys {
                views.push(self.read(key, mode).await?);
            }
            return Ok(views);
        }

        let mut conn = self.get_connection().await?;
        let prefixed: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();
        let raw: Vec<Option<Vec<u8>>> = conn
            .mget(&prefixed)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
        drop(conn);

        let mut views = Vec::with_capacity(raw.len());
        for bytes in raw {
            let entry = bytes
                .map(|data| {
                    serde_json::from_slice(&data)
                        .map_err(|e| CacheError::Deserialization(e.to_string()))
                })
                .transpose()?;
            views.push(self.view_for(entry, mode));
        }
        Ok(views)
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        validate_lock_ttl(ttl)?;

        let lock_key = self.prefixed_key(&lock_key_for(key));
        let token = format!(
            "{}:{}",
            std::process::id(),
            self.next_token.fetch_add(1, Ordering::Relaxed)
        );

        let mut conn = self.get_connection().await?;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&lock_key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
        drop(conn);

        if acquired.is_none() {
            return Ok(None);
        }

        let release_tx = self.release_tx.clone();
        Ok(Some(LockGuard::new(move || {
            // the reaper performs the actual DEL; if the process dies first,
            // the lock TTL expires it
            let _ = release_tx.send((lock_key, token));
        })))
    }

    async fn save(&self, key: &str, entry: StoredEntry, ttl: Duration) -> Result<()> {
        let serialized =
            serde_json::to_vec(&entry).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let prefixed = self.prefixed_key(key);
        let physical_ttl = ttl + self.config.grace;

        let mut conn = self.get_connection().await?;
        conn.set_ex::<_, _, ()>(&prefixed, &serialized, physical_ttl.as_secs())
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))
    }

    async fn delete_exact(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let prefixed = self.prefixed_key(key);

        let removed: u64 = conn
            .del(&prefixed)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_connection().await?;
        let prefixed: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();

        conn.unlink(&prefixed)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))
    }

    async fn clear_by_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.get_connection().await?;
        let match_pattern = format!("{}*", self.prefixed_key(prefix));

        let mut removed = 0u64;
        let mut cursor = 0u64;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(&match_pattern)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut *conn)
                .await
                .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;

            if !keys.is_empty() {
                let count: u64 = conn
                    .unlink(&keys)
                    .await
                    .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
                removed += count;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(removed)
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let now = self.clock.now_secs();
        Ok(self
            .fetch_entry(key)
            .await?
            .is_some_and(|entry| entry.is_live(now)))
    }
}

/// Drains guard releases, deleting each lock key only while its token still
/// matches the holder that enqueued it
async fn run_lock_reaper(
    pool: Pool<RedisConnectionManager>,
    mut release_rx: mpsc::UnboundedReceiver<(String, String)>,
) {
    while let Some((lock_key, token)) = release_rx.recv().await {
        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    target: "swr_cache",
                    lock_key = %lock_key,
                    error = %_e,
                    "lock release skipped; ttl will expire it"
                );
                continue;
            }
        };

        // GET/DEL is not atomic; the lock TTL bounds the exposure
        let held: Option<String> = match conn.get(&lock_key).await {
            Ok(held) => held,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    target: "swr_cache",
                    lock_key = %lock_key,
                    error = %_e,
                    "lock release skipped; ttl will expire it"
                );
                continue;
            }
        };
        if held.as_deref() == Some(token.as_str()) {
            if let Err(_e) = conn.del::<_, u64>(&lock_key).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    target: "swr_cache",
                    lock_key = %lock_key,
                    error = %_e,
                    "lock release failed; ttl will expire it"
                );
            }
        }
    }
}
