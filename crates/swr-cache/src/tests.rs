//! Integration tests for the cache engine
//!
//! These run against the memory store with a shared manual clock, so
//! expiration arithmetic is exact and timing-sensitive scenarios run on
//! tokio's paused clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::prelude::*;
use swr_cache_core::{
    CacheMetrics, EngineOperation, HitState, ManualClock, MissCause, ReadMode, StoreAdapter,
};

#[derive(Clone)]
struct TestLoader {
    tag: String,
    delay: Duration,
    calls: Arc<AtomicU32>,
}

impl TestLoader {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn with_delay(tag: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(tag)
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Loader for TestLoader {
    type Value = String;

    async fn resolve(&self, key: &Key) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if key.id_string() == "bad" {
            return Err(CacheError::loader(key.to_string(), "source down"));
        }
        Ok(format!("{}:{}", self.tag, key.id_string()))
    }
}

#[derive(Clone, Default)]
struct RecordingMetrics {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingMetrics {
    fn events(&self) -> Vec<String> {
        self.events.lock().expect("metrics mutex").clone()
    }

    fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }
}

impl CacheMetrics for RecordingMetrics {
    fn record_hit(&self, _key: &str, state: HitState) {
        self.events
            .lock()
            .expect("metrics mutex")
            .push(format!("hit:{}", state.as_str()));
    }

    fn record_fill(&self, _key: &str) {
        self.events.lock().expect("metrics mutex").push("fill".to_string());
    }

    fn record_miss(&self, _key: &str, cause: MissCause) {
        self.events
            .lock()
            .expect("metrics mutex")
            .push(format!("miss:{}", cause.as_str()));
    }

    fn record_latency(&self, _operation: EngineOperation, _duration: Duration) {}
}

type TestEngine = CacheEngine<MemoryStore, TestLoader, RecordingMetrics>;

/// 600s hard, 60s soft, no jitter: the window used by most scenarios
fn scenario_config() -> EngineConfig {
    let policy = GetPolicy::new(Duration::from_secs(600), Duration::from_secs(60))
        .expect("valid policy");
    EngineConfig::with_policy(policy).no_jitter()
}

fn test_engine(
    now: u64,
    loader: TestLoader,
    config: EngineConfig,
) -> (TestEngine, ManualClock, MemoryStore, RecordingMetrics) {
    let clock = ManualClock::at(now);
    let store = MemoryStore::with_clock(MemoryConfig::default(), Arc::new(clock.clone()));
    let metrics = RecordingMetrics::default();
    let engine = CacheEngine::with_metrics(store.clone(), loader, metrics.clone(), config)
        .with_clock(Arc::new(clock.clone()));
    (engine, clock, store, metrics)
}

fn product_key(id: &str) -> Key {
    Key::new("product", "item", Some("v2".to_string()), None, id).expect("valid key")
}

// --- scenarios ------------------------------------------------------------

#[tokio::test]
async fn scenario_fresh_hit() {
    let loader = TestLoader::new("loaded");
    let (engine, clock, _store, metrics) = test_engine(1000, loader.clone(), scenario_config());
    let key = product_key("12345");

    engine.put(&key, &"value".to_string()).await.unwrap();

    clock.set(1500);
    let result = engine.get(&key).await.unwrap();

    assert_eq!(result, ValueResult::hit("value".to_string(), 1000, 1540));
    assert_eq!(metrics.count("hit:fresh"), 1);
    assert_eq!(loader.calls(), 0);
}

#[tokio::test]
async fn scenario_leader_computes_on_miss() {
    let loader = TestLoader::new("loaded");
    let (engine, _clock, store, metrics) = test_engine(2000, loader.clone(), scenario_config());
    let key = product_key("12345");

    let result = engine.get(&key).await.unwrap();

    assert_eq!(result, ValueResult::hit("loaded:12345".to_string(), 2000, 2540));
    assert_eq!(metrics.count("fill"), 1);
    assert_eq!(loader.calls(), 1);
    assert!(store.contains(&key.to_string()).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn scenario_follower_serves_stale() {
    let loader = TestLoader::with_delay("loaded", Duration::from_millis(200));
    let (engine, clock, _store, metrics) = test_engine(1000, loader.clone(), scenario_config());
    let key = product_key("12345");

    engine.put(&key, &"old-value".to_string()).await.unwrap();
    clock.set(1700); // past hard expiry at 1600

    let leader = {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move { engine.get(&key).await.unwrap() })
    };
    // let the leader take the lock and park inside its loader
    tokio::time::sleep(Duration::from_millis(50)).await;

    let follower = engine.get(&key).await.unwrap();
    assert_eq!(
        follower,
        ValueResult::stale("old-value".to_string(), 1000, 1540)
    );
    assert_eq!(metrics.count("hit:stale"), 1);

    let led = leader.await.unwrap();
    assert_eq!(led, ValueResult::hit("loaded:12345".to_string(), 1700, 2240));
    assert_eq!(loader.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_follower_waits_for_first_fill() {
    let loader = TestLoader::with_delay("loaded", Duration::from_millis(300));
    let (engine, _clock, _store, metrics) = test_engine(3000, loader.clone(), scenario_config());
    let key = product_key("12345");

    let leader = {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move { engine.get(&key).await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let follower = engine.get(&key).await.unwrap();
    assert_eq!(
        follower,
        ValueResult::hit("loaded:12345".to_string(), 3000, 3540)
    );
    assert_eq!(metrics.count("hit:fresh_after_sleep"), 1);

    leader.await.unwrap();
    // the follower never resolved on its own
    assert_eq!(loader.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_fail_open_race() {
    // the leader's load outlasts the follower's whole 900ms wait budget
    let slow_loader = TestLoader::with_delay("loaded", Duration::from_secs(2));
    let (leader_engine, clock, store, _) = test_engine(3000, slow_loader.clone(), scenario_config());
    let key = product_key("12345");

    let fast_loader = TestLoader::new("loaded-prime");
    let follower_metrics = RecordingMetrics::default();
    let follower_engine: TestEngine = CacheEngine::with_metrics(
        store.clone(),
        fast_loader.clone(),
        follower_metrics.clone(),
        scenario_config(),
    )
    .with_clock(Arc::new(clock.clone()));

    let leader = {
        let engine = leader_engine.clone();
        let key = key.clone();
        tokio::spawn(async move { engine.get(&key).await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let follower = follower_engine.get(&key).await.unwrap();
    assert_eq!(
        follower,
        ValueResult::hit("loaded-prime:12345".to_string(), 3000, 3540)
    );
    assert_eq!(follower_metrics.count("miss:precompute_race"), 1);
    assert_eq!(fast_loader.calls(), 1);
    // fail-open never persists: the row appears only once the leader saves
    assert!(!store.contains(&key.to_string()).await.unwrap());

    leader.await.unwrap();
    assert!(store.contains(&key.to_string()).await.unwrap());
    let saved = store.read(&key.to_string(), ReadMode::Old).await.unwrap();
    let entry = saved.into_entry().unwrap();
    assert_eq!(
        serde_json::from_slice::<String>(&entry.payload).unwrap(),
        "loaded:12345"
    );
}

#[tokio::test]
async fn scenario_hierarchical_invalidation() {
    let loader = TestLoader::new("loaded");
    let (engine, _clock, store, _) = test_engine(1000, loader, scenario_config());

    let keys = [
        Key::new("user", "profile", Some("v2".into()), Some("en-US".into()), "1").unwrap(),
        Key::new("user", "profile", Some("v2".into()), Some("en-US".into()), "2").unwrap(),
        Key::new("user", "profile", Some("v1".into()), Some("en-US".into()), "1").unwrap(),
        Key::new("user", "preferences", Some("v2".into()), Some("en-US".into()), "1").unwrap(),
    ];
    for key in &keys {
        engine.put(key, &"v".to_string()).await.unwrap();
    }

    let selector = Selector::Prefix(
        KeyPrefix::new("user", "profile", Some("v2".into()), Some("en-US".into())).unwrap(),
    );
    let removed = engine
        .invalidate(&selector, &InvalidatePolicy::new(InvalidateMode::DeleteSync))
        .await
        .unwrap();

    assert_eq!(removed, 2);
    assert!(!store.contains(&keys[0].to_string()).await.unwrap());
    assert!(!store.contains(&keys[1].to_string()).await.unwrap());
    assert!(store.contains(&keys[2].to_string()).await.unwrap());
    assert!(store.contains(&keys[3].to_string()).await.unwrap());
}

// --- invariants -----------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn single_flight_admits_one_loader_call() {
    let loader = TestLoader::with_delay("loaded", Duration::from_millis(100));
    let (engine, _clock, _store, _) = test_engine(1000, loader.clone(), scenario_config());
    let key = product_key("hot");

    let mut callers = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let key = key.clone();
        callers.push(tokio::spawn(async move { engine.get(&key).await.unwrap() }));
    }

    for caller in callers {
        let result = caller.await.unwrap();
        assert!(result.is_usable(), "caller saw {result:?}");
        assert_eq!(result.into_value().unwrap(), "loaded:hot");
    }
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn fail_open_compute_is_not_persisted() {
    let loader = TestLoader::new("loaded");
    let config = scenario_config().wait(Duration::from_millis(1), 1);
    let (engine, _clock, store, metrics) = test_engine(1000, loader, config);
    let key = product_key("12345");

    // park a foreign lock so every caller loses the leader race
    let foreign = store
        .try_lock(&key.to_string(), Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let result = engine.get(&key).await.unwrap();
    assert!(result.is_hit());
    assert_eq!(metrics.count("miss:precompute_race"), 1);
    assert!(!store.contains(&key.to_string()).await.unwrap());
    drop(foreign);
}

#[tokio::test]
async fn fail_closed_returns_miss() {
    let loader = TestLoader::new("loaded");
    let policy = GetPolicy::new(Duration::from_secs(600), Duration::from_secs(60))
        .unwrap()
        .with_fail_mode(FailMode::Closed);
    let config = EngineConfig::with_policy(policy)
        .no_jitter()
        .wait(Duration::from_millis(1), 1);
    let (engine, _clock, store, metrics) = test_engine(1000, loader.clone(), config);
    let key = product_key("12345");

    let foreign = store
        .try_lock(&key.to_string(), Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let result = engine.get(&key).await.unwrap();
    assert_eq!(result, ValueResult::Miss);
    assert_eq!(metrics.count("miss:precompute_race_fail_closed"), 1);
    assert_eq!(loader.calls(), 0);
    drop(foreign);
}

#[tokio::test]
async fn loader_failure_becomes_miss() {
    let loader = TestLoader::new("loaded");
    let (engine, _clock, _store, metrics) = test_engine(1000, loader.clone(), scenario_config());
    let key = product_key("bad");

    let result = engine.get(&key).await.unwrap();
    assert_eq!(result, ValueResult::Miss);
    assert_eq!(metrics.count("miss:loader_failed"), 1);
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn exact_invalidation_is_idempotent() {
    let loader = TestLoader::new("loaded");
    let (engine, _clock, store, _) = test_engine(1000, loader, scenario_config());
    let key = product_key("12345");

    engine.put(&key, &"v".to_string()).await.unwrap();

    let first = engine
        .invalidate_exact(&key, InvalidateMode::DeleteSync)
        .await
        .unwrap();
    let second = engine
        .invalidate_exact(&key, InvalidateMode::DeleteSync)
        .await
        .unwrap();

    assert!(first);
    assert!(!second);
    assert!(!store.contains(&key.to_string()).await.unwrap());
}

#[tokio::test]
async fn exact_invalidation_spares_sibling_keys() {
    let loader = TestLoader::new("loaded");
    let (engine, _clock, store, _) = test_engine(1000, loader, scenario_config());
    let key = product_key("1");
    let sibling = product_key("12");

    engine.put(&key, &"a".to_string()).await.unwrap();
    engine.put(&sibling, &"b".to_string()).await.unwrap();

    engine
        .invalidate_exact(&key, InvalidateMode::DeleteSync)
        .await
        .unwrap();
    assert!(store.contains(&sibling.to_string()).await.unwrap());
}

#[tokio::test]
async fn jittered_expiry_is_deterministic_per_key() {
    let loader = TestLoader::new("loaded");
    let policy = GetPolicy::new(Duration::from_secs(600), Duration::from_secs(60)).unwrap();
    let config = EngineConfig::with_policy(policy); // jitter on
    let (engine, _clock, store, _) = test_engine(1000, loader, config);
    let key = product_key("12345");

    engine.put(&key, &"a".to_string()).await.unwrap();
    let first = store.read(&key.to_string(), ReadMode::Old).await.unwrap();
    let first_expiry = first.into_entry().unwrap().hard_expires_at;

    engine.put(&key, &"b".to_string()).await.unwrap();
    let second = store.read(&key.to_string(), ReadMode::Old).await.unwrap();
    let second_expiry = second.into_entry().unwrap().hard_expires_at;

    assert_eq!(first_expiry, second_expiry);
    // within +-10% of the 600s hard ttl
    assert!((1540..=1660).contains(&first_expiry));
}

// --- surface --------------------------------------------------------------

#[tokio::test]
async fn get_many_batches_and_isolates() {
    let loader = TestLoader::new("loaded");
    let (engine, _clock, _store, metrics) = test_engine(1000, loader.clone(), scenario_config());

    let cached = product_key("cached");
    engine.put(&cached, &"warm".to_string()).await.unwrap();

    let keys = [cached.clone(), product_key("m1"), product_key("bad")];
    let results = engine.get_many(&keys).await;

    assert_eq!(results.len(), 3);
    assert_eq!(
        results[&cached.to_string()],
        ValueResult::hit("warm".to_string(), 1000, 1540)
    );
    assert_eq!(
        *results[&keys[1].to_string()].value().unwrap(),
        "loaded:m1"
    );
    // the failing key misses without poisoning the batch
    assert!(results[&keys[2].to_string()].is_miss());
    assert_eq!(metrics.count("hit:fresh"), 1);
    assert_eq!(metrics.count("fill"), 1);
    assert_eq!(metrics.count("miss:loader_failed"), 1);
}

#[tokio::test]
async fn refresh_sync_overwrites() {
    let loader = TestLoader::new("loaded");
    let (engine, clock, _store, _) = test_engine(1000, loader.clone(), scenario_config());
    let key = product_key("12345");

    engine.put(&key, &"old".to_string()).await.unwrap();
    clock.set(1100);

    engine.refresh(&key, RefreshMode::Sync).await.unwrap();
    assert_eq!(loader.calls(), 1);

    let result = engine.get(&key).await.unwrap();
    assert_eq!(
        result,
        ValueResult::hit("loaded:12345".to_string(), 1100, 1640)
    );
    // the fresh read did not resolve again
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn refresh_async_without_queue_degrades_to_sync() {
    let loader = TestLoader::new("loaded");
    let (engine, _clock, store, _) = test_engine(1000, loader.clone(), scenario_config());
    let key = product_key("12345");

    engine.refresh(&key, RefreshMode::Async).await.unwrap();
    assert_eq!(loader.calls(), 1);
    assert!(store.contains(&key.to_string()).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn deferred_delete_flows_through_worker() {
    let loader = TestLoader::new("loaded");
    let (engine, _clock, store, _) = test_engine(1000, loader, scenario_config());
    let (queue, worker) = invalidation_channel();
    let engine = engine.with_events(queue);
    tokio::spawn(worker.run(engine.clone()));

    let key = product_key("12345");
    engine.put(&key, &"v".to_string()).await.unwrap();

    let existed = engine
        .invalidate_exact(&key, InvalidateMode::DeleteAsync)
        .await
        .unwrap();
    // dispatch is non-blocking; the entry is removed eventually
    assert!(!existed);
    for _ in 0..50 {
        if !store.contains(&key.to_string()).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("deferred delete never applied");
}

#[tokio::test(start_paused = true)]
async fn deferred_refresh_flows_through_worker() {
    let loader = TestLoader::new("loaded");
    let (engine, _clock, store, _) = test_engine(1000, loader.clone(), scenario_config());
    let (queue, worker) = invalidation_channel();
    let engine = engine.with_events(queue);
    tokio::spawn(worker.run(engine.clone()));

    let key = product_key("12345");
    engine.refresh(&key, RefreshMode::Async).await.unwrap();

    for _ in 0..50 {
        if store.contains(&key.to_string()).await.unwrap() {
            assert_eq!(loader.calls(), 1);
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("deferred refresh never applied");
}

#[tokio::test(start_paused = true)]
async fn deferred_prefix_invalidation_flows_through_worker() {
    let loader = TestLoader::new("loaded");
    let (engine, _clock, store, _) = test_engine(1000, loader, scenario_config());
    let (queue, worker) = invalidation_channel();
    let engine = engine.with_events(queue);
    tokio::spawn(worker.run(engine.clone()));

    let key = product_key("12345");
    engine.put(&key, &"v".to_string()).await.unwrap();

    let selector = Selector::Key(key.clone());
    engine
        .invalidate(&selector, &InvalidatePolicy::new(InvalidateMode::DeleteAsync))
        .await
        .unwrap();

    for _ in 0..50 {
        if !store.contains(&key.to_string()).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("deferred prefix invalidation never applied");
}

#[tokio::test]
async fn cascading_invalidation_widens_to_domain_and_facet() {
    let loader = TestLoader::new("loaded");
    let (engine, _clock, store, _) = test_engine(1000, loader, scenario_config());

    let v1 = Key::new("user", "profile", Some("v1".into()), None, "1").unwrap();
    let v2 = Key::new("user", "profile", Some("v2".into()), None, "1").unwrap();
    let other = Key::simple("user", "preferences", "1").unwrap();
    for key in [&v1, &v2, &other] {
        engine.put(key, &"v".to_string()).await.unwrap();
    }

    let selector = Selector::Key(v2.clone());
    let policy =
        InvalidatePolicy::new(InvalidateMode::DeleteSync).with_cascade_namespaces(true);
    engine.invalidate(&selector, &policy).await.unwrap();

    assert!(!store.contains(&v1.to_string()).await.unwrap());
    assert!(!store.contains(&v2.to_string()).await.unwrap());
    assert!(store.contains(&other.to_string()).await.unwrap());
}

#[tokio::test]
async fn bump_namespace_clears_the_subtree() {
    let loader = TestLoader::new("loaded");
    let (engine, _clock, store, _) = test_engine(1000, loader, scenario_config());

    let inside = product_key("1");
    let outside = Key::simple("product", "itemx", "1").unwrap();
    engine.put(&inside, &"a".to_string()).await.unwrap();
    engine.put(&outside, &"b".to_string()).await.unwrap();

    let prefix = KeyPrefix::new("product", "item", Some("v2".into()), None).unwrap();
    let removed = engine.bump_namespace(&prefix).await.unwrap();

    assert_eq!(removed, 1);
    assert!(!store.contains(&inside.to_string()).await.unwrap());
    assert!(store.contains(&outside.to_string()).await.unwrap());
}

#[tokio::test]
async fn value_access_on_miss_is_a_typed_error() {
    let loader = TestLoader::new("loaded");
    let policy = GetPolicy::new(Duration::from_secs(600), Duration::from_secs(60))
        .unwrap()
        .with_fail_mode(FailMode::Closed);
    let config = EngineConfig::with_policy(policy)
        .no_jitter()
        .wait(Duration::from_millis(1), 1);
    let (engine, _clock, store, _) = test_engine(1000, loader, config);
    let key = product_key("12345");

    let foreign = store
        .try_lock(&key.to_string(), Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();
    let miss = engine.get(&key).await.unwrap();
    assert!(matches!(
        miss.value(),
        Err(CacheError::ValueAccessOnMiss)
    ));
    drop(foreign);
}
