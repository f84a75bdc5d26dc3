use crate::{CacheMetrics, EngineOperation, HitState, MissCause};
use std::time::Duration;
use tracing::debug;

/// Metrics adapter that logs events via `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingMetrics {
    /// Service name/prefix (optional)
    service_name: Option<String>,
}

impl TracingMetrics {
    /// Create new tracing metrics adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with service name prefix
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }
}

impl CacheMetrics for TracingMetrics {
    fn record_hit(&self, key: &str, state: HitState) {
        debug!(
            target: "swr_cache",
            event = "hit",
            key = %key,
            state = state.as_str(),
            service = ?self.service_name,
            "Cache Hit"
        );
    }

    fn record_fill(&self, key: &str) {
        debug!(
            target: "swr_cache",
            event = "fill",
            key = %key,
            service = ?self.service_name,
            "Cache Fill"
        );
    }

    fn record_miss(&self, key: &str, cause: MissCause) {
        debug!(
            target: "swr_cache",
            event = "miss",
            key = %key,
            cause = cause.as_str(),
            service = ?self.service_name,
            "Cache Miss"
        );
    }

    fn record_latency(&self, operation: EngineOperation, duration: Duration) {
        tracing::trace!(
            target: "swr_cache",
            event = "latency",
            operation = operation.as_str(),
            duration_ms = duration.as_millis(),
            service = ?self.service_name,
            "Cache Operation Latency"
        );
    }
}
