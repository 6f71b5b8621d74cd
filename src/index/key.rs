//! Key and identifier types.
//!
//! A [`NormalizedKey`] is `"{namespace}:{key}"` with the first character of
//! the key lower-cased and spaces replaced by underscores. Wiki titles are
//! first-letter case-insensitive, so `Foo` and `foo` must land on the same
//! index entry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque message group identifier supplied by the group registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Create a group id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for GroupId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Index key derived from a namespace and a raw message key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    /// Normalize a raw key under the given namespace.
    pub fn new(namespace: i32, key: &str) -> Self {
        let mut chars = key.chars();
        let folded: String = match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => String::new(),
        };
        Self(format!("{}:{}", namespace, folded).replace(' ', "_"))
    }

    /// Wrap a string that is already in normalized form (e.g. read back
    /// from a backing store).
    pub fn from_normalized(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The normalized string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split back into the page this key addresses.
    ///
    /// Returns None if the key has no parsable namespace prefix.
    pub fn page(&self) -> Option<PageIdentity> {
        let (namespace, key) = self.0.split_once(':')?;
        Some(PageIdentity {
            namespace: namespace.parse().ok()?,
            key: key.to_string(),
        })
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Page addressed by an index key, as handed to membership observers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageIdentity {
    /// Namespace id.
    pub namespace: i32,
    /// Page key within the namespace (normalized form).
    pub key: String,
}

impl fmt::Display for PageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}
