//! Stored entry envelope
//!
//! The remote row for one cached key: serialized payload plus creation and
//! hard-expiry timestamps. The soft expiry is never stored; it is derived at
//! read time from the policy's soft window.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::UnixSeconds;

/// One cached entry as persisted in the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Serialized payload bytes
    pub payload: Vec<u8>,
    /// When the entry was written
    pub created_at: UnixSeconds,
    /// Absolute hard expiry; past this instant the entry counts as gone
    pub hard_expires_at: UnixSeconds,
}

impl StoredEntry {
    pub fn new(payload: Vec<u8>, created_at: UnixSeconds, hard_expires_at: UnixSeconds) -> Self {
        Self {
            payload,
            created_at,
            hard_expires_at,
        }
    }

    /// Soft expiry derived from the given window, clamped to `created_at`
    pub fn soft_expires_at(&self, soft_ttl: Duration) -> UnixSeconds {
        self.hard_expires_at
            .saturating_sub(soft_ttl.as_secs())
            .max(self.created_at)
    }

    /// Whether the entry is inside its hard TTL
    pub fn is_live(&self, now: UnixSeconds) -> bool {
        now < self.hard_expires_at
    }

    /// Whether the entry is fresh for the given soft window
    pub fn is_fresh(&self, now: UnixSeconds, soft_ttl: Duration) -> bool {
        now < self.soft_expires_at(soft_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_expiry_derivation() {
        let entry = StoredEntry::new(vec![1], 1000, 1600);
        assert_eq!(entry.soft_expires_at(Duration::from_secs(60)), 1540);
        assert_eq!(entry.soft_expires_at(Duration::ZERO), 1600);
    }

    #[test]
    fn test_soft_expiry_clamped_to_creation() {
        let entry = StoredEntry::new(vec![1], 1000, 1600);
        // a window larger than the whole lifetime clamps to created_at
        assert_eq!(entry.soft_expires_at(Duration::from_secs(10_000)), 1000);
    }

    #[test]
    fn test_freshness_windows() {
        let entry = StoredEntry::new(vec![1], 1000, 1600);
        let soft = Duration::from_secs(60);

        assert!(entry.is_fresh(1500, soft));
        assert!(!entry.is_fresh(1540, soft));
        assert!(entry.is_live(1540));
        assert!(!entry.is_live(1600));
    }

    #[test]
    fn test_envelope_round_trips_as_json() {
        let entry = StoredEntry::new(b"payload".to_vec(), 1000, 1600);
        let bytes = serde_json::to_vec(&entry).unwrap();
        let decoded: StoredEntry = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, entry);
    }
}
