//! Hierarchical cache key
//!
//! A [`Key`] is an immutable fingerprint for one cached entry. It encodes
//! domain/facet/schema-version/locale plus an id into a storage-ready string
//! whose bytes are identical across processes for semantically equal inputs.
//! That stability is what makes cross-process invalidation and single-flight
//! coordination possible, so all canonicalization lives here rather than in
//! callers.
//!
//! Wire format (each part rawurlencoded, joined by `/`):
//!
//! ```text
//! domain "/" facet ["/" schema_version] ["/" locale] "/" id_string
//! ```
//!
//! Composite ids serialize to canonical JSON (keys sorted recursively,
//! non-ASCII passed through), then base64url without padding, prefixed `j:`.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::{CacheError, Result};

/// Characters escaped by `rawurlencode`: everything except `A-Za-z0-9-_.~`
const RAW_URL_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a key segment for the wire format
pub(crate) fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, RAW_URL_ENCODE).to_string()
}

/// Identifier of a cached entry: a scalar string or a composite structure
///
/// Composite ids canonicalize to the same bytes regardless of the insertion
/// order of their maps; sequences keep their positional order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Id {
    /// Plain scalar id, used verbatim
    Str(String),
    /// Ordered sequence, serialized positionally
    Seq(Vec<Id>),
    /// Mapping, canonicalized by recursively sorting keys
    Map(BTreeMap<String, Id>),
}

impl Id {
    /// Build a map id from key/value pairs; input order is irrelevant
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Id>,
        I: IntoIterator<Item = (K, V)>,
    {
        Id::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a sequence id preserving element order
    pub fn seq<V, I>(items: I) -> Self
    where
        V: Into<Id>,
        I: IntoIterator<Item = V>,
    {
        Id::Seq(items.into_iter().map(Into::into).collect())
    }

    fn is_scalar(&self) -> bool {
        matches!(self, Id::Str(_))
    }

    /// Canonical JSON text: sorted map keys, positional sequences,
    /// non-ASCII emitted as UTF-8
    fn write_canonical_json(&self, out: &mut String) {
        match self {
            Id::Str(s) => out.push_str(&json_string(s)),
            Id::Seq(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical_json(out);
                }
                out.push(']');
            }
            Id::Map(map) => {
                out.push('{');
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&json_string(k));
                    out.push(':');
                    v.write_canonical_json(out);
                }
                out.push('}');
            }
        }
    }

    /// Deterministic string form: scalars verbatim, composites as
    /// `j:` + base64url(canonical JSON) with padding stripped
    pub fn canonical_string(&self) -> String {
        match self {
            Id::Str(s) => s.clone(),
            _ => {
                let mut json = String::new();
                self.write_canonical_json(&mut json);
                format!("j:{}", URL_SAFE_NO_PAD.encode(json.as_bytes()))
            }
        }
    }
}

fn json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::Str(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::Str(s)
    }
}

impl From<u64> for Id {
    fn from(n: u64) -> Self {
        Id::Str(n.to_string())
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Str(n.to_string())
    }
}

/// Immutable hierarchical cache key
///
/// Construction validates and normalizes every part and precomputes the wire
/// strings, so equal logical keys are byte-identical and `to_string()` is
/// free afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    domain: String,
    facet: String,
    schema_version: Option<String>,
    locale: Option<String>,
    id: Id,
    id_string: String,
    prefix_string: String,
    key_string: String,
}

impl Key {
    /// Create a key from its parts
    ///
    /// Fails with [`CacheError::InvalidArgument`] when domain, facet, an
    /// optional segment, or a scalar id is empty or whitespace-only.
    pub fn new(
        domain: impl Into<String>,
        facet: impl Into<String>,
        schema_version: Option<String>,
        locale: Option<String>,
        id: impl Into<Id>,
    ) -> Result<Self> {
        let domain = normalized("domain", domain.into())?;
        let facet = normalized("facet", facet.into())?;
        let schema_version = schema_version
            .map(|v| normalized("schema_version", v))
            .transpose()?;
        let locale = locale.map(|v| normalized("locale", v)).transpose()?;
        let id = id.into();
        if let Id::Str(s) = &id {
            if s.trim().is_empty() {
                return Err(CacheError::invalid("id must not be empty"));
            }
        }

        let id_string = id.canonical_string();
        let prefix_string = [
            Some(domain.as_str()),
            Some(facet.as_str()),
            schema_version.as_deref(),
            locale.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/");
        let key_string = format!("{}/{}", prefix_string, encode_segment(&id_string));

        Ok(Self {
            domain,
            facet,
            schema_version,
            locale,
            id,
            id_string,
            prefix_string,
            key_string,
        })
    }

    /// Convenience constructor without schema version or locale
    pub fn simple(
        domain: impl Into<String>,
        facet: impl Into<String>,
        id: impl Into<Id>,
    ) -> Result<Self> {
        Self::new(domain, facet, None, None, id)
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

    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Deterministic string form of the id
    pub fn id_string(&self) -> &str {
        &self.id_string
    }

    /// Encoded prefix: domain/facet[/schema][/locale]
    pub fn prefix_string(&self) -> &str {
        &self.prefix_string
    }

    /// Full encoded key string as stored remotely
    pub fn key_string(&self) -> &str {
        &self.key_string
    }

    /// Unencoded prefix segments in wire order
    pub fn prefix_segments(&self) -> Vec<&str> {
        [
            Some(self.domain.as_str()),
            Some(self.facet.as_str()),
            self.schema_version.as_deref(),
            self.locale.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Unencoded segments including the id string
    pub fn segments(&self) -> Vec<&str> {
        let mut segments = self.prefix_segments();
        segments.push(&self.id_string);
        segments
    }

    /// Whether the id is a plain scalar (as opposed to composite)
    pub fn has_scalar_id(&self) -> bool {
        self.id.is_scalar()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key_string)
    }
}

fn normalized(name: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CacheError::invalid(format!("{name} must not be empty")));
    }
    Ok(trimmed.to_string())
}
