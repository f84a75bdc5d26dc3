//! Deterministic TTL jitter
//!
//! Perturbs hard TTLs by up to ±`percent` so entries written together do not
//! expire together. The offset is keyed by the key string rather than drawn
//! from a RNG: every process computes the same TTL for the same key, while
//! different keys still spread across the window.

use std::time::Duration;

use xxhash_rust::xxh32::xxh32;

use crate::types::Key;

/// Deterministic ±percent TTL perturbation keyed by the key string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlJitter {
    percent: u32,
}

impl TtlJitter {
    /// Jitter with the given half-width percentage (0 disables)
    pub fn new(percent: u32) -> Self {
        Self { percent }
    }

    /// No perturbation; TTLs pass through (floored at one second)
    pub fn disabled() -> Self {
        Self { percent: 0 }
    }

    pub fn percent(&self) -> u32 {
        self.percent
    }

    /// Apply the jitter to a hard TTL
    ///
    /// `delta = floor(ttl * percent / 100)`. A zero delta returns the TTL
    /// unchanged; otherwise the offset is `hash(key) mod (2*delta+1) - delta`,
    /// landing in `[-delta, +delta]`. The result never drops below 1s.
    pub fn apply(&self, ttl: Duration, key: &Key) -> Duration {
        let ttl_secs = ttl.as_secs();
        let delta = ttl_secs * u64::from(self.percent) / 100;
        if delta == 0 {
            return Duration::from_secs(ttl_secs.max(1));
        }

        let hash = u64::from(xxh32(key.key_string().as_bytes(), 0));
        let offset = (hash % (2 * delta + 1)) as i64 - delta as i64;
        let jittered = ttl_secs.saturating_add_signed(offset);
        Duration::from_secs(jittered.max(1))
    }
}

impl Default for TtlJitter {
    /// ±10%
    fn default() -> Self {
        Self { percent: 10 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> Key {
        Key::simple("jitter", "test", id).unwrap()
    }

    #[test]
    fn test_offset_stays_in_bounds() {
        let jitter = TtlJitter::new(10);
        for i in 0..200 {
            let k = key(&i.to_string());
            for ttl_secs in [1u64, 9, 10, 60, 600, 86_400] {
                let ttl = Duration::from_secs(ttl_secs);
                let delta = ttl_secs * 10 / 100;
                let applied = jitter.apply(ttl, &k).as_secs();
                let low = ttl_secs.saturating_sub(delta).max(1);
                let high = ttl_secs + delta;
                assert!(
                    (low..=high).contains(&applied),
                    "ttl {ttl_secs} key {i}: {applied} outside [{low}, {high}]"
                );
            }
        }
    }

    #[test]
    fn test_deterministic_per_key() {
        let jitter = TtlJitter::new(15);
        let k = key("stable");
        let ttl = Duration::from_secs(600);
        assert_eq!(jitter.apply(ttl, &k), jitter.apply(ttl, &k));
    }

    #[test]
    fn test_spreads_across_keys() {
        let jitter = TtlJitter::new(10);
        let ttl = Duration::from_secs(10_000);
        let distinct: std::collections::HashSet<u64> = (0..50)
            .map(|i| jitter.apply(ttl, &key(&i.to_string())).as_secs())
            .collect();
        assert!(distinct.len() > 10, "jitter barely spreads: {distinct:?}");
    }

    #[test]
    fn test_small_ttl_passes_through() {
        // delta rounds to zero below 10s at 10%
        let jitter = TtlJitter::new(10);
        assert_eq!(jitter.apply(Duration::from_secs(9), &key("a")), Duration::from_secs(9));
        assert_eq!(jitter.apply(Duration::ZERO, &key("a")), Duration::from_secs(1));
    }

    #[test]
    fn test_disabled_jitter() {
        let jitter = TtlJitter::disabled();
        assert_eq!(
            jitter.apply(Duration::from_secs(600), &key("a")),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_never_below_one_second() {
        let jitter = TtlJitter::new(100);
        for i in 0..50 {
            let applied = jitter.apply(Duration::from_secs(1), &key(&i.to_string()));
            assert!(applied >= Duration::from_secs(1));
        }
    }
}
