//! Fluent construction and parsing of cache keys

use percent_encoding::percent_decode_str;

use crate::error::{CacheError, Result};
use crate::types::key::{Id, Key};

/// Stateful builder for [`Key`]
///
/// Collects parts with `with_*` setters and assembles them in [`build`].
/// [`from_str`] parses a stored key string back into its components, so a
/// key recovered from the store (or an invalidation message) round-trips:
///
/// ```
/// use swr_cache_core::{Key, KeyBuilder};
///
/// let key = Key::new("user", "profile", Some("v2".into()), Some("en-US".into()), "7").unwrap();
/// let parsed = KeyBuilder::from_str(&key.to_string()).unwrap().build().unwrap();
/// assert_eq!(parsed.to_string(), key.to_string());
/// ```
///
/// [`build`]: KeyBuilder::build
/// [`from_str`]: KeyBuilder::from_str
#[derive(Debug, Clone, Default)]
pub struct KeyBuilder {
    domain: Option<String>,
    facet: Option<String>,
    schema_version: Option<String>,
    locale: Option<String>,
    id: Option<Id>,
}

impl KeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing key's parts
    pub fn from_key(key: &Key) -> Self {
        Self {
            domain: Some(key.domain().to_string()),
            facet: Some(key.facet().to_string()),
            schema_version: key.schema_version().map(str::to_string),
            locale: key.locale().map(str::to_string),
            id: Some(key.id().clone()),
        }
    }

    /// Parse a stored key string back into builder parts
    ///
    /// Splits on `/` and percent-decodes each segment. Positions 0 and 1 are
    /// domain and facet, the last is the id; one middle segment maps to the
    /// schema version, two map to schema version then locale.
    pub fn from_str(key_string: &str) -> Result<Self> {
        let segments: Vec<String> = key_string
            .split('/')
            .map(decode_segment)
            .collect::<Result<_>>()?;

        if segments.len() < 3 {
            return Err(CacheError::invalid(format!(
                "key string needs at least domain/facet/id: {key_string}"
            )));
        }
        if segments.len() > 5 {
            return Err(CacheError::invalid(format!(
                "key string has too many segments: {key_string}"
            )));
        }

        let mut parts = segments.into_iter();
        let domain = parts.next();
        let facet = parts.next();
        let mut middle: Vec<String> = parts.collect();
        // the final position is always the id
        let id = middle.pop().map(Id::Str);
        let mut middle = middle.into_iter();

        Ok(Self {
            domain,
            facet,
            schema_version: middle.next(),
            locale: middle.next(),
            id,
        })
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_facet(mut self, facet: impl Into<String>) -> Self {
        self.facet = Some(facet.into());
        self
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = Some(version.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<Id>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Assemble the key
    ///
    /// Fails with [`CacheError::InvalidArgument`] unless domain, facet and id
    /// are all set.
    pub fn build(self) -> Result<Key> {
        let domain = self
            .domain
            .ok_or_else(|| CacheError::invalid("key builder is missing a domain"))?;
        let facet = self
            .facet
            .ok_or_else(|| CacheError::invalid("key builder is missing a facet"))?;
        let id = self
            .id
            .ok_or_else(|| CacheError::invalid("key builder is missing an id"))?;
        Key::new(domain, facet, self.schema_version, self.locale, id)
    }
}

fn decode_segment(segment: &str) -> Result<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|e| CacheError::invalid(format!("key segment is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_all_parts() {
        assert!(KeyBuilder::new().build().is_err());
        assert!(KeyBuilder::new().with_domain("d").build().is_err());
        assert!(
            KeyBuilder::new()
                .with_domain("d")
                .with_facet("f")
                .build()
                .is_err()
        );
        assert!(
            KeyBuilder::new()
                .with_domain("d")
                .with_facet("f")
                .with_id("1")
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_fluent_build() {
        let key = KeyBuilder::new()
            .with_domain("user")
            .with_facet("profile")
            .with_schema_version("v2")
            .with_locale("en-US")
            .with_id("99")
            .build()
            .unwrap();
        assert_eq!(key.to_string(), "user/profile/v2/en-US/99");
    }

    #[test]
    fn test_from_key_copies_parts() {
        let key = Key::new("a", "b", Some("v1".to_string()), None, "5").unwrap();
        let rebuilt = KeyBuilder::from_key(&key).build().unwrap();
        assert_eq!(rebuilt, key);
    }

    #[test]
    fn test_from_str_positional_semantics() {
        let three = KeyBuilder::from_str("d/f/1").unwrap().build().unwrap();
        assert_eq!(three.schema_version(), None);
        assert_eq!(three.locale(), None);

        let four = KeyBuilder::from_str("d/f/v2/1").unwrap().build().unwrap();
        assert_eq!(four.schema_version(), Some("v2"));
        assert_eq!(four.locale(), None);

        let five = KeyBuilder::from_str("d/f/v2/en-US/1").unwrap().build().unwrap();
        assert_eq!(five.schema_version(), Some("v2"));
        assert_eq!(five.locale(), Some("en-US"));
    }

    #[test]
    fn test_from_str_rejects_malformed() {
        assert!(KeyBuilder::from_str("d/f").is_err());
        assert!(KeyBuilder::from_str("d/f/a/b/c/d").is_err());
    }

    #[test]
    fn test_round_trip_scalar() {
        let key = Key::new(
            "user profile",
            "item",
            Some("v2".to_string()),
            Some("en-US".to_string()),
            "a/b c",
        )
        .unwrap();
        let parsed = KeyBuilder::from_str(&key.to_string()).unwrap().build().unwrap();
        assert_eq!(parsed.to_string(), key.to_string());
    }

    #[test]
    fn test_round_trip_composite() {
        let key = Key::simple("order", "list", Id::map([("u", "42"), ("page", "2")])).unwrap();
        let parsed = KeyBuilder::from_str(&key.to_string()).unwrap().build().unwrap();
        // the composite id survives opaquely as its canonical `j:` form
        assert_eq!(parsed.to_string(), key.to_string());
        assert_eq!(parsed.id_string(), key.id_string());
    }
}
