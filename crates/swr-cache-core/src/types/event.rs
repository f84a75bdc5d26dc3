//! Deferred invalidation events and their wire format
//!
//! One event describes one deferred invalidation or refresh. Events travel
//! either in-process (the engine's queue) or across processes over an
//! external bus such as a Redis pub/sub channel; `to_message`/`from_message`
//! define the transport encoding for the latter. Delivery is at-least-once,
//! so every handler action must be idempotent (deletes delete, refreshes
//! overwrite).

use crate::types::builder::KeyBuilder;
use crate::types::key::Key;
use crate::types::selector::KeyPrefix;

/// One deferred invalidation or refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent {
    /// Remove exactly one entry
    DeleteExact(Key),
    /// Remove a whole prefix subtree
    DeletePrefix(KeyPrefix),
    /// Re-resolve one key and overwrite its entry
    Refresh(Key),
}

impl InvalidationEvent {
    /// Serialize for transport over an external bus
    pub fn to_message(&self) -> String {
        match self {
            InvalidationEvent::DeleteExact(key) => format!("del:{key}"),
            InvalidationEvent::DeletePrefix(prefix) => format!("prefix:{prefix}"),
            InvalidationEvent::Refresh(key) => format!("refresh:{key}"),
        }
    }

    /// Parse a transported event; `None` for unknown or malformed messages
    pub fn from_message(msg: &str) -> Option<Self> {
        let (kind, value) = msg.split_once(':')?;
        match kind {
            "del" => {
                let key = KeyBuilder::from_str(value).ok()?.build().ok()?;
                Some(InvalidationEvent::DeleteExact(key))
            }
            "prefix" => Some(InvalidationEvent::DeletePrefix(KeyPrefix::parse(value).ok()?)),
            "refresh" => {
                let key = KeyBuilder::from_str(value).ok()?.build().ok()?;
                Some(InvalidationEvent::Refresh(key))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::key::Id;

    fn key() -> Key {
        Key::new(
            "user",
            "profile",
            Some("v2".to_string()),
            Some("en-US".to_string()),
            "7",
        )
        .unwrap()
    }

    #[test]
    fn test_event_wire_round_trip() {
        let events = [
            InvalidationEvent::DeleteExact(key()),
            InvalidationEvent::DeletePrefix(KeyPrefix::from_key(&key())),
            InvalidationEvent::Refresh(key()),
        ];
        for event in events {
            let msg = event.to_message();
            let parsed = InvalidationEvent::from_message(&msg);
            assert_eq!(parsed, Some(event), "message was {msg}");
        }
    }

    #[test]
    fn test_event_wire_format() {
        assert_eq!(
            InvalidationEvent::DeleteExact(key()).to_message(),
            "del:user/profile/v2/en-US/7"
        );
        assert_eq!(
            InvalidationEvent::DeletePrefix(KeyPrefix::from_key(&key())).to_message(),
            "prefix:user/profile/v2/en-US"
        );
        assert_eq!(
            InvalidationEvent::Refresh(key()).to_message(),
            "refresh:user/profile/v2/en-US/7"
        );
    }

    #[test]
    fn test_composite_key_survives_the_wire() {
        let key = Key::simple("order", "list", Id::map([("u", "1"), ("p", "2")])).unwrap();
        let msg = InvalidationEvent::Refresh(key.clone()).to_message();
        let parsed = InvalidationEvent::from_message(&msg).unwrap();
        match parsed {
            InvalidationEvent::Refresh(parsed_key) => {
                assert_eq!(parsed_key.to_string(), key.to_string());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_malformed_messages_rejected() {
        assert_eq!(InvalidationEvent::from_message("bogus"), None);
        assert_eq!(InvalidationEvent::from_message("del:not-enough"), None);
        assert_eq!(InvalidationEvent::from_message("unknown:d/f/1"), None);
    }
}
