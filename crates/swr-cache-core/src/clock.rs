//! Injectable wall clock
//!
//! The engine and the memory store never read system time directly. They go
//! through [`Clock`], which makes expiration arithmetic deterministic in
//! tests: swap in a [`ManualClock`] and move time by hand.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the unix epoch
pub type UnixSeconds = u64;

/// Source of wall-clock time
pub trait Clock: Send + Sync + 'static {
    /// Current time as whole seconds since the unix epoch
    fn now_secs(&self) -> UnixSeconds;
}

/// Real system clock (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> UnixSeconds {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Hand-driven clock for deterministic tests
///
/// Cloning shares the underlying instant, so a clock handed to a store and
/// an engine advances for both.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    secs: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock pinned at the given unix second
    pub fn at(secs: UnixSeconds) -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(secs)),
        }
    }

    /// Move the clock to an absolute unix second
    pub fn set(&self, secs: UnixSeconds) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    /// Advance the clock by the given number of seconds
    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> UnixSeconds {
        self.secs.load(Ordering::SeqCst)
    }
}
