//! Cache engine: five-tier reads, single-flight fills, invalidation
//!
//! A read walks up to five tiers:
//!
//! 1. fresh hit from the store,
//! 2. leader compute under the per-key lock (single-flight),
//! 3. follower serving the previous value,
//! 4. follower waiting, bounded, for the leader's save,
//! 5. fail-open compute (never saved) or fail-closed miss.
//!
//! Store failures never surface to callers: each tier treats an error as "no
//! data here" and control falls through to the next tier. Retrying is the
//! adapter's business, not the engine's.

mod events;

pub use events::{InvalidationQueue, InvalidationWorker, invalidation_channel};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;

use swr_cache_core::{
    CacheMetrics, Clock, EngineOperation, FailMode, GetPolicy, HitState, InvalidateMode,
    InvalidatePolicy, InvalidationEvent, ItemView, Key, KeyPrefix, Loader, MissCause, NoopMetrics,
    PayloadFormat, ReadMode, RefreshMode, Result, Selector, StoreAdapter, StoredEntry,
    SystemClock, TtlJitter, UnixSeconds, ValueResult,
};

/// Configuration for [`CacheEngine`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Policy applied when the caller does not pass one
    pub default_policy: GetPolicy,
    /// Deterministic perturbation of hard TTLs
    pub jitter: TtlJitter,
    /// Encoding applied to values entering the stored envelope
    pub format: PayloadFormat,
    /// TTL of the per-key rebuild lock
    pub lock_ttl: Duration,
    /// Pause between tier-4 wait attempts
    pub wait_pause: Duration,
    /// Upper bound on tier-4 wait attempts; the wait never exceeds
    /// `wait_pause * wait_attempts`
    pub wait_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_policy: GetPolicy::default(),
            jitter: TtlJitter::default(),
            format: PayloadFormat::default(),
            lock_ttl: Duration::from_secs(30),
            wait_pause: Duration::from_millis(150),
            wait_attempts: 6,
        }
    }
}

impl EngineConfig {
    /// Create config with a specific default policy
    pub fn with_policy(policy: GetPolicy) -> Self {
        Self {
            default_policy: policy,
            ..Default::default()
        }
    }

    /// Disable TTL jitter
    pub fn no_jitter(mut self) -> Self {
        self.jitter = TtlJitter::disabled();
        self
    }

    /// Set the payload encoding
    pub fn format(mut self, format: PayloadFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the tier-4 wait bound
    pub fn wait(mut self, pause: Duration, attempts: u32) -> Self {
        self.wait_pause = pause;
        self.wait_attempts = attempts;
        self
    }

    /// Set the rebuild lock TTL
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }
}

/// Orchestrator between application code and the shared store
///
/// Generic over:
/// - `B`: the store adapter (Memory, Redis)
/// - `L`: the application loader resolving source data
/// - `M`: the metrics collector
///
/// All fields are immutable after construction; cloning shares the same
/// store, loader and queue, so one engine value can serve any number of
/// concurrent callers. Callers impose deadlines by wrapping calls in
/// `tokio::time::timeout`; cancellation mid-fill releases the rebuild lock
/// through the guard.
pub struct CacheEngine<B, L, M = NoopMetrics>
where
    B: StoreAdapter,
    L: Loader,
    M: CacheMetrics,
{
    store: Arc<B>,
    loader: Arc<L>,
    metrics: Arc<M>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    events: Option<InvalidationQueue>,
}

impl<B, L> CacheEngine<B, L, NoopMetrics>
where
    B: StoreAdapter,
    L: Loader,
    L::Value: Serialize + DeserializeOwned + Send + Sync,
{
    /// Create an engine with default configuration and no metrics
    pub fn new(store: B, loader: L) -> Self {
        Self::with_config(store, loader, EngineConfig::default())
    }

    /// Create with custom config
    pub fn with_config(store: B, loader: L, config: EngineConfig) -> Self {
        Self {
            store: Arc::new(store),
            loader: Arc::new(loader),
            metrics: Arc::new(NoopMetrics),
            clock: Arc::new(SystemClock),
            config,
            events: None,
        }
    }
}

impl<B, L, M> CacheEngine<B, L, M>
where
    B: StoreAdapter,
    L: Loader,
    L::Value: Serialize + DeserializeOwned + Send + Sync,
    M: CacheMetrics,
{
    /// Create an engine with a custom metrics collector
    pub fn with_metrics(store: B, loader: L, metrics: M, config: EngineConfig) -> Self {
        Self {
            store: Arc::new(store),
            loader: Arc::new(loader),
            metrics: Arc::new(metrics),
            clock: Arc::new(SystemClock),
            config,
            events: None,
        }
    }

    /// Replace the clock (deterministic tests)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach the queue that carries deferred invalidations and refreshes
    pub fn with_events(mut self, events: InvalidationQueue) -> Self {
        self.events = Some(events);
        self
    }

    /// Read one key under the engine's default policy
    pub async fn get(&self, key: &Key) -> Result<ValueResult<L::Value>> {
        let policy = self.config.default_policy.clone();
        self.get_with(key, &policy).await
    }

    /// Read one key under an explicit policy
    pub async fn get_with(&self, key: &Key, policy: &GetPolicy) -> Result<ValueResult<L::Value>> {
        let start = Instant::now();
        let result = self.read_tiers(key, policy).await;
        self.metrics
            .record_latency(EngineOperation::Get, start.elapsed());
        Ok(result)
    }

    /// Read several keys; the tier-1 probe is batched against the store
    ///
    /// Outcomes are per-key isolated: one key's loader or store trouble never
    /// poisons the rest of the batch. The result map is keyed by key string.
    pub async fn get_many(&self, keys: &[Key]) -> HashMap<String, ValueResult<L::Value>> {
        let start = Instant::now();
        let policy = self.config.default_policy.clone();
        let key_strings: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let refs: Vec<&str> = key_strings.iter().map(String::as_str).collect();

        let soft = policy.soft_ttl();
        let views = match self
            .store
            .read_many(&refs, ReadMode::Precompute { soft })
            .await
        {
            Ok(views) => views,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "swr_cache", error = %_e, "batched tier-1 read failed");
                vec![ItemView::missing(); keys.len()]
            }
        };

        let mut results = HashMap::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let view = views.get(i).cloned().unwrap_or_else(ItemView::missing);
            let outcome = match self.fresh_hit(key, view, &policy) {
                Some(hit) => hit,
                None => self.fill_tiers(key, &policy).await,
            };
            results.insert(key_strings[i].clone(), outcome);
        }

        self.metrics
            .record_latency(EngineOperation::GetMany, start.elapsed());
        results
    }

    /// Store a value directly under the default policy's hard TTL
    pub async fn put(&self, key: &Key, value: &L::Value) -> Result<()> {
        let start = Instant::now();
        let policy = self.config.default_policy.clone();
        let payload = self.config.format.encode(value)?;
        let result = self.save_payload(key, payload, &policy).await.map(|_| ());
        self.metrics
            .record_latency(EngineOperation::Put, start.elapsed());
        result
    }

    /// Re-resolve a key and overwrite its entry
    ///
    /// `Sync` performs the load in the caller's context; `Async` enqueues a
    /// refresh event and returns immediately. Without an attached queue the
    /// async mode degrades to the synchronous path.
    pub async fn refresh(&self, key: &Key, mode: RefreshMode) -> Result<()> {
        let start = Instant::now();
        let result = match mode {
            RefreshMode::Sync => self.refresh_sync(key).await,
            RefreshMode::Async => {
                match &self.events {
                    Some(queue) => {
                        queue.dispatch(InvalidationEvent::Refresh(key.clone()));
                        Ok(())
                    }
                    None => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            target: "swr_cache",
                            key = %key,
                            "no event queue attached; refreshing synchronously"
                        );
                        self.refresh_sync(key).await
                    }
                }
            }
        };
        self.metrics
            .record_latency(EngineOperation::Refresh, start.elapsed());
        result
    }

    /// Remove every entry under the selector's prefix subtree
    ///
    /// Returns the number of entries removed (zero for deferred modes).
    pub async fn invalidate(
        &self,
        selector: &Selector,
        policy: &InvalidatePolicy,
    ) -> Result<u64> {
        let start = Instant::now();
        let result = self.invalidate_inner(selector, policy).await;
        self.metrics
            .record_latency(EngineOperation::Invalidate, start.elapsed());
        result
    }

    /// Remove exactly one entry, no prefix walk
    ///
    /// Returns whether the entry existed (false for deferred modes).
    pub async fn invalidate_exact(&self, key: &Key, mode: InvalidateMode) -> Result<bool> {
        let start = Instant::now();
        let result = match mode {
            InvalidateMode::RefreshSync => self.refresh_sync(key).await.map(|_| true),
            InvalidateMode::RefreshAsync => {
                self.dispatch_or(InvalidationEvent::Refresh(key.clone()))
                    .await?;
                Ok(false)
            }
            InvalidateMode::DeleteAsync => {
                self.dispatch_or(InvalidationEvent::DeleteExact(key.clone()))
                    .await?;
                Ok(false)
            }
            InvalidateMode::Default | InvalidateMode::DeleteSync => {
                self.store.delete_exact(&key.to_string()).await
            }
        };
        self.metrics
            .record_latency(EngineOperation::Invalidate, start.elapsed());
        result
    }

    /// Clear a whole namespace; alias for a synchronous prefix invalidation
    pub async fn bump_namespace(&self, prefix: &KeyPrefix) -> Result<u64> {
        self.clear_prefix(prefix.prefix_string()).await
    }

    /// Whether a live (not hard-expired) entry exists for the key
    pub async fn contains(&self, key: &Key) -> Result<bool> {
        self.store.contains(&key.to_string()).await
    }

    // --- read pipeline ----------------------------------------------------

    async fn read_tiers(&self, key: &Key, policy: &GetPolicy) -> ValueResult<L::Value> {
        let key_string = key.to_string();
        let soft = policy.soft_ttl();
        let mut store_failed = false;

        // Tier 1: fresh hit
        match self
            .store
            .read(&key_string, ReadMode::Precompute { soft })
            .await
        {
            Ok(view) => {
                if let Some(hit) = self.fresh_hit(key, view, policy) {
                    return hit;
                }
            }
            Err(_e) => {
                store_failed = true;
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "swr_cache", key = %key_string, error = %_e, "tier-1 read failed");
            }
        }

        self.fill_tiers_tracking(key, policy, store_failed).await
    }

    /// Tiers 2-5 for a key whose tier-1 probe did not produce a fresh hit
    async fn fill_tiers(&self, key: &Key, policy: &GetPolicy) -> ValueResult<L::Value> {
        self.fill_tiers_tracking(key, policy, false).await
    }

    async fn fill_tiers_tracking(
        &self,
        key: &Key,
        policy: &GetPolicy,
        mut store_failed: bool,
    ) -> ValueResult<L::Value> {
        let key_string = key.to_string();
        let soft = policy.soft_ttl();

        // Tier 2: leader compute under the per-key lock
        match self.store.try_lock(&key_string, self.config.lock_ttl).await {
            Ok(Some(guard)) => {
                let outcome = self.lead_and_fill(key, policy).await;
                guard.release();
                return outcome;
            }
            Ok(None) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "swr_cache", key = %key_string, "lock held elsewhere; following");
            }
            Err(_e) => {
                // a failed lock attempt reads as "another leader exists"
                store_failed = true;
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "swr_cache", key = %key_string, error = %_e, "tier-2 lock failed");
            }
        }

        // Tier 3: serve the previous value while the leader rebuilds
        match self.store.read(&key_string, ReadMode::Old).await {
            Ok(view) => {
                if let Some(entry) = view.into_entry() {
                    if let Some(value) = self.decode(&key_string, &entry) {
                        let soft_expires_at = entry.soft_expires_at(soft);
                        self.metrics.record_hit(&key_string, HitState::Stale);
                        #[cfg(feature = "tracing")]
                        tracing::debug!(target: "swr_cache", key = %key_string, "serving stale");
                        return ValueResult::stale(value, entry.created_at, soft_expires_at);
                    }
                }
            }
            Err(_e) => {
                store_failed = true;
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "swr_cache", key = %key_string, error = %_e, "tier-3 read failed");
            }
        }

        // Tier 4: bounded wait for the leader's save
        let wait = ReadMode::Sleep {
            pause: self.config.wait_pause,
            max_attempts: self.config.wait_attempts,
        };
        match self.store.read(&key_string, wait).await {
            Ok(view) if view.is_hit() => {
                if let Some(entry) = view.into_entry() {
                    if let Some(value) = self.decode(&key_string, &entry) {
                        let soft_expires_at = entry.soft_expires_at(soft);
                        self.metrics
                            .record_hit(&key_string, HitState::FreshAfterSleep);
                        return ValueResult::hit(value, entry.created_at, soft_expires_at);
                    }
                }
            }
            Ok(_) => {}
            Err(_e) => {
                store_failed = true;
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "swr_cache", key = %key_string, error = %_e, "tier-4 wait failed");
            }
        }

        // Tier 5: fail-open compute (never saved) or fail-closed miss
        match policy.fail_mode() {
            FailMode::Open => match self.loader.resolve(key).await {
                Ok(value) => {
                    let cause = if store_failed {
                        MissCause::StoreUnavailable
                    } else {
                        MissCause::PrecomputeRace
                    };
                    self.metrics.record_miss(&key_string, cause);
                    let (now, soft_expires_at) = self.fill_window(policy);
                    ValueResult::hit(value, now, soft_expires_at)
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(target: "swr_cache", key = %key_string, error = %_e, "loader failed");
                    self.metrics.record_miss(&key_string, MissCause::LoaderFailed);
                    ValueResult::miss()
                }
            },
            FailMode::Closed => {
                let cause = if store_failed {
                    MissCause::StoreUnavailable
                } else {
                    MissCause::PrecomputeRaceFailClosed
                };
                self.metrics.record_miss(&key_string, cause);
                ValueResult::miss()
            }
        }
    }

    /// Leader body: resolve, save, serve; the caller releases the lock
    async fn lead_and_fill(&self, key: &Key, policy: &GetPolicy) -> ValueResult<L::Value> {
        let key_string = key.to_string();

        let value = match self.loader.resolve(key).await {
            Ok(value) => value,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(target: "swr_cache", key = %key_string, error = %_e, "loader failed");
                self.metrics.record_miss(&key_string, MissCause::LoaderFailed);
                return ValueResult::miss();
            }
        };

        let payload = match self.config.format.encode(&value) {
            Ok(payload) => payload,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(target: "swr_cache", key = %key_string, error = %_e, "payload encoding failed");
                return self.unsaved_outcome(value, policy, &key_string);
            }
        };

        match self.save_payload(key, payload, policy).await {
            Ok((now, soft_expires_at)) => {
                self.metrics.record_fill(&key_string);
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "swr_cache", key = %key_string, "leader filled");
                ValueResult::hit(value, now, soft_expires_at)
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "swr_cache", key = %key_string, error = %_e, "leader save failed");
                self.unsaved_outcome(value, policy, &key_string)
            }
        }
    }

    /// Serve or drop a computed value that could not be persisted
    fn unsaved_outcome(
        &self,
        value: L::Value,
        policy: &GetPolicy,
        key_string: &str,
    ) -> ValueResult<L::Value> {
        match policy.fail_mode() {
            FailMode::Open => {
                self.metrics
                    .record_miss(key_string, MissCause::StoreUnavailable);
                let (now, soft_expires_at) = self.fill_window(policy);
                ValueResult::hit(value, now, soft_expires_at)
            }
            FailMode::Closed => {
                self.metrics
                    .record_miss(key_string, MissCause::StoreUnavailable);
                ValueResult::miss()
            }
        }
    }

    /// Tier-1 hit evaluation shared by `get` and `get_many`
    fn fresh_hit(
        &self,
        key: &Key,
        view: ItemView,
        policy: &GetPolicy,
    ) -> Option<ValueResult<L::Value>> {
        if !view.is_hit() {
            return None;
        }
        let key_string = key.to_string();
        let entry = view.into_entry()?;
        let value = self.decode(&key_string, &entry)?;
        let soft_expires_at = entry.soft_expires_at(policy.soft_ttl());
        self.metrics.record_hit(&key_string, HitState::Fresh);
        Some(ValueResult::hit(value, entry.created_at, soft_expires_at))
    }

    fn decode(&self, key_string: &str, entry: &StoredEntry) -> Option<L::Value> {
        match self.config.format.decode(&entry.payload) {
            Ok(value) => Some(value),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    target: "swr_cache",
                    key = %key_string,
                    error = %_e,
                    "stored payload is undecodable; treating as absent"
                );
                None
            }
        }
    }

    // --- write paths ------------------------------------------------------

    /// Envelope and persist a payload; returns (created_at, soft_expires_at)
    async fn save_payload(
        &self,
        key: &Key,
        payload: Vec<u8>,
        policy: &GetPolicy,
    ) -> Result<(UnixSeconds, UnixSeconds)> {
        let now = self.clock.now_secs();
        let hard_ttl = self.config.jitter.apply(policy.hard_ttl(), key);
        let entry = StoredEntry::new(payload, now, now + hard_ttl.as_secs());

        self.store.save(&key.to_string(), entry, hard_ttl).await?;
        let (now, soft_expires_at) = self.fill_window(policy);
        Ok((now, soft_expires_at))
    }

    /// Timestamps a caller sees for a value computed right now
    ///
    /// The advertised window uses the unjittered policy TTLs; jitter only
    /// spreads the store-side expiry.
    fn fill_window(&self, policy: &GetPolicy) -> (UnixSeconds, UnixSeconds) {
        let now = self.clock.now_secs();
        let hard = now + policy.hard_ttl().as_secs();
        let soft = hard.saturating_sub(policy.soft_ttl().as_secs()).max(now);
        (now, soft)
    }

    async fn refresh_sync(&self, key: &Key) -> Result<()> {
        let value = self.loader.resolve(key).await.map_err(|e| {
            #[cfg(feature = "tracing")]
            tracing::warn!(target: "swr_cache", key = %key, error = %e, "loader failed");
            e
        })?;
        let policy = self.config.default_policy.clone();
        let payload = self.config.format.encode(&value)?;
        self.save_payload(key, payload, &policy).await?;
        Ok(())
    }

    async fn invalidate_inner(
        &self,
        selector: &Selector,
        policy: &InvalidatePolicy,
    ) -> Result<u64> {
        let mode = policy.mode();

        if mode.is_async() {
            let event = match (mode.is_refresh(), selector) {
                (true, Selector::Key(key)) => InvalidationEvent::Refresh(key.clone()),
                // a bare prefix cannot be re-resolved; fall back to deletion
                _ => InvalidationEvent::DeletePrefix(self.effective_prefix(selector, policy)),
            };
            self.dispatch_or(event).await?;
            return Ok(0);
        }

        if mode.is_refresh() {
            if let Selector::Key(key) = selector {
                self.refresh_sync(key).await?;
                return Ok(1);
            }
        }

        let prefix = self.effective_prefix(selector, policy);
        self.clear_prefix(prefix.prefix_string()).await
    }

    /// The prefix an invalidation covers, widened to domain/facet when the
    /// policy cascades across schema versions and locales
    fn effective_prefix(&self, selector: &Selector, policy: &InvalidatePolicy) -> KeyPrefix {
        let narrow = match selector {
            Selector::Key(key) => KeyPrefix::from_key(key),
            Selector::Prefix(prefix) => prefix.clone(),
        };
        if !policy.cascade_namespaces() {
            return narrow;
        }
        KeyPrefix::new(narrow.domain(), narrow.facet(), None, None).unwrap_or(narrow)
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<u64> {
        // the trailing separator keeps "user/profile" from matching
        // "user/profileX"
        self.store.clear_by_prefix(&format!("{prefix}/")).await
    }

    /// Enqueue when a queue is attached, otherwise handle synchronously
    async fn dispatch_or(&self, event: InvalidationEvent) -> Result<()> {
        match &self.events {
            Some(queue) => {
                queue.dispatch(event);
                Ok(())
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "swr_cache", "no event queue attached; handling synchronously");
                match event {
                    InvalidationEvent::DeleteExact(key) => {
                        self.store.delete_exact(&key.to_string()).await?;
                    }
                    InvalidationEvent::DeletePrefix(prefix) => {
                        self.clear_prefix(prefix.prefix_string()).await?;
                    }
                    InvalidationEvent::Refresh(key) => {
                        self.refresh_sync(&key).await?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl<B, L, M> Clone for CacheEngine<B, L, M>
where
    B: StoreAdapter,
    L: Loader,
    M: CacheMetrics,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            loader: self.loader.clone(),
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
        }
    }
}
