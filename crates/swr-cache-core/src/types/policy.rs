//! Read and invalidation policies
//!
//! Policies are immutable records. `with_*` derivations return new values;
//! the originals are never mutated, so a policy can be shared freely across
//! concurrent callers.

use std::time::Duration;

use crate::error::{CacheError, Result};

/// How a refresh request is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// Resolve and store in the caller's context
    #[default]
    Sync,
    /// Enqueue an event; a worker performs the synchronous refresh later
    Async,
}

/// Behavior when every read tier is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailMode {
    /// Compute without caching and serve the caller
    #[default]
    Open,
    /// Report a miss
    Closed,
}

/// Policy for a single read through the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPolicy {
    hard_ttl: Duration,
    soft_ttl: Duration,
    refresh_mode: RefreshMode,
    fail_mode: FailMode,
}

impl GetPolicy {
    /// Create a policy with the given hard TTL and soft window
    ///
    /// The hard TTL must be at least one second and the soft window must not
    /// exceed it; anything else is an [`CacheError::InvalidArgument`].
    pub fn new(hard_ttl: Duration, soft_ttl: Duration) -> Result<Self> {
        if hard_ttl < Duration::from_secs(1) {
            return Err(CacheError::invalid(format!(
                "hard ttl must be at least 1s, got {hard_ttl:?}"
            )));
        }
        if soft_ttl > hard_ttl {
            return Err(CacheError::invalid(format!(
                "soft ttl {soft_ttl:?} exceeds hard ttl {hard_ttl:?}"
            )));
        }
        Ok(Self {
            hard_ttl,
            soft_ttl,
            refresh_mode: RefreshMode::default(),
            fail_mode: FailMode::default(),
        })
    }

    pub fn hard_ttl(&self) -> Duration {
        self.hard_ttl
    }

    pub fn soft_ttl(&self) -> Duration {
        self.soft_ttl
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        self.refresh_mode
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    /// Derive a policy with a different soft window
    pub fn with_soft_ttl(&self, soft_ttl: Duration) -> Result<Self> {
        let mut policy = self.clone();
        if soft_ttl > policy.hard_ttl {
            return Err(CacheError::invalid(format!(
                "soft ttl {soft_ttl:?} exceeds hard ttl {:?}",
                policy.hard_ttl
            )));
        }
        policy.soft_ttl = soft_ttl;
        Ok(policy)
    }

    /// Derive a policy with a different refresh mode
    pub fn with_refresh_mode(&self, mode: RefreshMode) -> Self {
        let mut policy = self.clone();
        policy.refresh_mode = mode;
        policy
    }

    /// Derive a policy with a different fail mode
    pub fn with_fail_mode(&self, mode: FailMode) -> Self {
        let mut policy = self.clone();
        policy.fail_mode = mode;
        policy
    }
}

impl Default for GetPolicy {
    /// Five minutes hard, one minute soft, synchronous refresh, fail-open
    fn default() -> Self {
        Self {
            hard_ttl: Duration::from_secs(300),
            soft_ttl: Duration::from_secs(60),
            refresh_mode: RefreshMode::Sync,
            fail_mode: FailMode::Open,
        }
    }
}

/// How an invalidation request is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidateMode {
    /// Use the engine's configured default (synchronous delete)
    #[default]
    Default,
    /// Delete in the caller's context
    DeleteSync,
    /// Enqueue a delete event
    DeleteAsync,
    /// Re-resolve and overwrite in the caller's context
    RefreshSync,
    /// Enqueue a refresh event
    RefreshAsync,
}

impl InvalidateMode {
    /// Whether this mode defers work to the event queue
    pub fn is_async(&self) -> bool {
        matches!(self, InvalidateMode::DeleteAsync | InvalidateMode::RefreshAsync)
    }

    /// Whether this mode re-resolves instead of deleting
    pub fn is_refresh(&self) -> bool {
        matches!(self, InvalidateMode::RefreshSync | InvalidateMode::RefreshAsync)
    }
}

/// Policy for invalidation requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InvalidatePolicy {
    mode: InvalidateMode,
    cascade_namespaces: bool,
}

impl InvalidatePolicy {
    pub fn new(mode: InvalidateMode) -> Self {
        Self {
            mode,
            cascade_namespaces: false,
        }
    }

    pub fn mode(&self) -> InvalidateMode {
        self.mode
    }

    pub fn cascade_namespaces(&self) -> bool {
        self.cascade_namespaces
    }

    /// Derive a policy that also clears sibling namespaces
    pub fn with_cascade_namespaces(&self, cascade: bool) -> Self {
        let mut policy = *self;
        policy.cascade_namespaces = cascade;
        policy
    }
}
