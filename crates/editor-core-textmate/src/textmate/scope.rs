use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A dotted TextMate scope name such as `source.python` or `string.quoted.single`.
///
/// Grammar scope names are the registry keys; rule scope names classify tokens.
/// Cloning is a reference-count bump.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeName(Arc<str>);

impl ScopeName {
    /// Create a scope name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The scope as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if `selector` matches this scope on dotted-segment boundaries.
    ///
    /// `comment` matches `comment` and `comment.line.number-sign`, but not `commentary`.
    pub fn matches_prefix(&self, selector: &str) -> bool {
        scope_matches(&self.0, selector)
    }

    /// Number of dotted segments.
    pub fn segment_count(&self) -> usize {
        segment_count(&self.0)
    }
}

pub(crate) fn scope_matches(scope: &str, selector: &str) -> bool {
    if selector.is_empty() {
        return false;
    }
    scope == selector
        || (scope.len() > selector.len()
            && scope.starts_with(selector)
            && scope.as_bytes()[selector.len()] == b'.')
}

pub(crate) fn segment_count(scope: &str) -> usize {
    if scope.is_empty() {
        0
    } else {
        scope.split('.').count()
    }
}

impl Deref for ScopeName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ScopeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ScopeName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScopeName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ScopeName {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&String> for ScopeName {
    fn from(s: &String) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for ScopeName {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ScopeName {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl fmt::Debug for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ScopeName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ScopeName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s))
    }
}
