//! Application-supplied source resolution

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Key;

/// Resolves source data for a key
///
/// The engine owns all failure handling: a loader error is converted into a
/// miss with a `loader_failed` cause and a structured log entry, never
/// propagated to the caller as-is. Implementations may take arbitrary time;
/// the engine makes no latency assumption beyond the caller's own deadline.
#[async_trait]
pub trait Loader: Send + Sync + 'static {
    /// The value this loader produces
    type Value: Send;

    /// Fetch the source value for the key
    async fn resolve(&self, key: &Key) -> Result<Self::Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    struct Doubler;

    #[async_trait]
    impl Loader for Doubler {
        type Value = String;

        async fn resolve(&self, key: &Key) -> Result<String> {
            Ok(format!("{}{}", key.id_string(), key.id_string()))
        }
    }

    struct Failing;

    #[async_trait]
    impl Loader for Failing {
        type Value = String;

        async fn resolve(&self, key: &Key) -> Result<String> {
            Err(CacheError::loader(key.to_string(), "source down"))
        }
    }

    #[tokio::test]
    async fn test_loader_contract() {
        let key = Key::simple("d", "f", "ab").unwrap();
        assert_eq!(Doubler.resolve(&key).await.unwrap(), "abab");
        assert!(Failing.resolve(&key).await.is_err());
    }
}
