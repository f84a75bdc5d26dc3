//! Capability traits the engine is polymorphic over

mod loader;
mod metrics;
mod store;

pub use loader::Loader;
pub use metrics::{CacheMetrics, EngineOperation, HitState, MissCause, NoopMetrics};
pub use store::{
    ItemView, LOCK_TAG, LockGuard, MAX_LOCK_TTL, ReadMode, StoreAdapter, lock_key_for,
    validate_lock_ttl,
};

#[cfg(feature = "metrics")]
pub use metrics::MetricsRecorder;

#[cfg(feature = "tracing")]
mod tracing;
#[cfg(feature = "tracing")]
pub use tracing::TracingMetrics;
