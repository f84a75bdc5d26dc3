//! Invalidation selectors
//!
//! Hierarchical invalidation targets either one exact key or a whole prefix
//! subtree (domain/facet, optionally narrowed by schema version and locale).

use std::fmt;

use crate::error::Result;
use crate::types::key::Key;

/// Prefix of the key hierarchy: domain/facet[/schema][/locale]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix {
    domain: String,
    facet: String,
    schema_version: Option<String>,
    locale: Option<String>,
    prefix_string: String,
}

impl KeyPrefix {
    /// Create a prefix selector
    ///
    /// Validation matches [`Key`]: empty or whitespace-only segments are
    /// rejected. Narrowing by locale requires a schema version, since the
    /// wire format is positional.
    pub fn new(
        domain: impl Into<String>,
        facet: impl Into<String>,
        schema_version: Option<String>,
        locale: Option<String>,
    ) -> Result<Self> {
        // delegate validation and encoding to Key with a throwaway id
        let probe = Key::new(domain, facet, schema_version, locale, "-")?;
        Ok(Self::from_key(&probe))
    }

    /// The prefix subtree covering an existing key
    pub fn from_key(key: &Key) -> Self {
        Self {
            domain: key.domain().to_string(),
            facet: key.facet().to_string(),
            schema_version: key.schema_version().map(str::to_string),
            locale: key.locale().map(str::to_string),
            prefix_string: key.prefix_string().to_string(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn facet(&self) -> &str {
        &self.facet
    }

    pub fn schema_version(&self) -> Option<&str> {
        self.schema_version.as_deref()
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// Encoded prefix as it appears at the head of stored key strings
    pub fn prefix_string(&self) -> &str {
        &self.prefix_string
    }

    /// Parse an encoded prefix string (2 to 4 segments)
    pub fn parse(prefix: &str) -> Result<Self> {
        use crate::error::CacheError;
        use percent_encoding::percent_decode_str;

        let decoded: Vec<String> = prefix
            .trim_end_matches('/')
            .split('/')
            .map(|s| {
                percent_decode_str(s)
                    .decode_utf8()
                    .map(|cow| cow.into_owned())
                    .map_err(|e| CacheError::invalid(format!("prefix is not valid UTF-8: {e}")))
            })
            .collect::<Result<_>>()?;

        if decoded.len() < 2 || decoded.len() > 4 {
            return Err(CacheError::invalid(format!(
                "prefix needs 2 to 4 segments: {prefix}"
            )));
        }

        let mut parts = decoded.into_iter();
        let domain = parts.next().unwrap_or_default();
        let facet = parts.next().unwrap_or_default();
        Self::new(domain, facet, parts.next(), parts.next())
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix_string)
    }
}

/// Target of an invalidation: one key's subtree or an explicit prefix
///
/// Note that selecting by [`Key`] still scopes to the key's *prefix*; exact
/// single-entry removal goes through the engine's `invalidate_exact`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Key(Key),
    Prefix(KeyPrefix),
}

impl Selector {
    /// Encoded prefix string this selector covers
    pub fn prefix_string(&self) -> &str {
        match self {
            Selector::Key(key) => key.prefix_string(),
            Selector::Prefix(prefix) => prefix.prefix_string(),
        }
    }
}

impl From<Key> for Selector {
    fn from(key: Key) -> Self {
        Selector::Key(key)
    }
}

impl From<KeyPrefix> for Selector {
    fn from(prefix: KeyPrefix) -> Self {
        Selector::Prefix(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_string() {
        let prefix = KeyPrefix::new(
            "user",
            "profile",
            Some("v2".to_string()),
            Some("en-US".to_string()),
        )
        .unwrap();
        assert_eq!(prefix.prefix_string(), "user/profile/v2/en-US");
    }

    #[test]
    fn test_prefix_matches_key_head() {
        let key = Key::new(
            "user",
            "profile",
            Some("v2".to_string()),
            Some("en-US".to_string()),
            "1",
        )
        .unwrap();
        let prefix = KeyPrefix::from_key(&key);
        assert!(key.to_string().starts_with(prefix.prefix_string()));
    }

    #[test]
    fn test_prefix_validation() {
        assert!(KeyPrefix::new("", "f", None, None).is_err());
        assert!(KeyPrefix::new("d", " ", None, None).is_err());
    }

    #[test]
    fn test_parse_round_trip() {
        let prefix = KeyPrefix::new("user", "profile", Some("v2".to_string()), None).unwrap();
        let parsed = KeyPrefix::parse(prefix.prefix_string()).unwrap();
        assert_eq!(parsed, prefix);
    }

    #[test]
    fn test_parse_rejects_bad_arity() {
        assert!(KeyPrefix::parse("only-domain").is_err());
        assert!(KeyPrefix::parse("a/b/c/d/e").is_err());
    }

    #[test]
    fn test_selector_from_key_uses_prefix() {
        let key = Key::simple("product", "item", "9").unwrap();
        let selector = Selector::from(key.clone());
        assert_eq!(selector.prefix_string(), "product/item");
    }
}
