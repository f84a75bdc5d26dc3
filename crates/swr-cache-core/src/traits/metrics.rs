//! Metrics trait for cache observability

use std::time::Duration;

/// State label attached to hit counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitState {
    /// Tier-1 fresh hit
    Fresh,
    /// Tier-3 stale value served while a leader rebuilds
    Stale,
    /// Tier-4 fresh value observed after waiting out a rebuild
    FreshAfterSleep,
}

impl HitState {
    /// Get state as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            HitState::Fresh => "fresh",
            HitState::Stale => "stale",
            HitState::FreshAfterSleep => "fresh_after_sleep",
        }
    }
}

/// Cause label attached to miss counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MissCause {
    /// The application loader failed
    LoaderFailed,
    /// Lost the precompute race and fail-open computed without caching
    PrecomputeRace,
    /// Lost the precompute race under fail-closed policy
    PrecomputeRaceFailClosed,
    /// The store was unreachable and the policy was fail-closed
    StoreUnavailable,
}

impl MissCause {
    /// Get cause as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            MissCause::LoaderFailed => "loader_failed",
            MissCause::PrecomputeRace => "precompute_race",
            MissCause::PrecomputeRaceFailClosed => "precompute_race_fail_closed",
            MissCause::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Engine operation for latency tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOperation {
    Get,
    GetMany,
    Put,
    Refresh,
    Invalidate,
}

impl EngineOperation {
    /// Get operation as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineOperation::Get => "get",
            EngineOperation::GetMany => "get_many",
            EngineOperation::Put => "put",
            EngineOperation::Refresh => "refresh",
            EngineOperation::Invalidate => "invalidate",
        }
    }
}

/// Trait for cache metrics/observability
///
/// Implement this to integrate with your metrics system. All methods must be
/// safe for concurrent use.
pub trait CacheMetrics: Send + Sync + 'static {
    /// Record a served value (fresh, stale, or fresh-after-sleep)
    fn record_hit(&self, key: &str, state: HitState);

    /// Record a leader computation that filled the cache
    fn record_fill(&self, key: &str);

    /// Record a miss with its cause
    fn record_miss(&self, key: &str, cause: MissCause);

    /// Record operation latency
    fn record_latency(&self, operation: EngineOperation, duration: Duration);
}

/// No-op metrics implementation (default)
///
/// Zero overhead when metrics are not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl CacheMetrics for NoopMetrics {
    #[inline]
    fn record_hit(&self, _key: &str, _state: HitState) {}

    #[inline]
    fn record_fill(&self, _key: &str) {}

    #[inline]
    fn record_miss(&self, _key: &str, _cause: MissCause) {}

    #[inline]
    fn record_latency(&self, _operation: EngineOperation, _duration: Duration) {}
}

/// Adapter emitting to the `metrics` facade
///
/// Counter names: `swr_cache_hit{state}`, `swr_cache_fill`,
/// `swr_cache_miss{cause}`; latency goes to the
/// `swr_cache_operation_seconds{operation}` histogram.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

#[cfg(feature = "metrics")]
impl CacheMetrics for MetricsRecorder {
    fn record_hit(&self, _key: &str, state: HitState) {
        metrics::counter!("swr_cache_hit", "state" => state.as_str()).increment(1);
    }

    fn record_fill(&self, _key: &str) {
        metrics::counter!("swr_cache_fill").increment(1);
    }

    fn record_miss(&self, _key: &str, cause: MissCause) {
        metrics::counter!("swr_cache_miss", "cause" => cause.as_str()).increment(1);
    }

    fn record_latency(&self, operation: EngineOperation, duration: Duration) {
        metrics::histogram!("swr_cache_operation_seconds", "operation" => operation.as_str())
            .record(duration.as_secs_f64());
    }
}
