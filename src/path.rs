//! Absolute catalog paths
//!
//! Every cache lookup normalizes its input first, so path equality is the
//! join key across the whole crate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};

/// A normalized absolute catalog path (`/zone/home/alice`).
///
/// Construction goes through [`normalize`], so a `CatalogPath` never has a
/// trailing `/` (except the root) and never contains empty segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CatalogPath(String);

impl CatalogPath {
    /// The root collection `/`
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and normalize an input string
    pub fn new(input: &str) -> GridResult<Self> {
        normalize(input)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Final path segment (`""` for the root)
    pub fn name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => "",
        }
    }

    /// Parent path; the root is its own parent
    pub fn parent(&self) -> CatalogPath {
        split(self).0
    }

    /// Append a single segment
    pub fn join(&self, segment: &str) -> GridResult<CatalogPath> {
        if segment.is_empty() || segment.contains('/') {
            return Err(GridError::InvalidPath {
                path: format!("{}/{}", self.0, segment),
                reason: "segment must be non-empty and contain no '/'".to_string(),
            });
        }
        if self.is_root() {
            Ok(Self(format!("/{}", segment)))
        } else {
            Ok(Self(format!("{}/{}", self.0, segment)))
        }
    }

    /// True iff `other` equals `self` or lies below it
    pub fn contains(&self, other: &CatalogPath) -> bool {
        is_prefix(self, other)
    }

    /// True iff `other` is an immediate child of `self`
    pub fn is_parent_of(&self, other: &CatalogPath) -> bool {
        !other.is_root() && &other.parent() == self
    }
}

impl fmt::Display for CatalogPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CatalogPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CatalogPath {
    type Error = GridError;

    fn try_from(value: String) -> GridResult<Self> {
        normalize(&value)
    }
}

impl TryFrom<&str> for CatalogPath {
    type Error = GridError;

    fn try_from(value: &str) -> GridResult<Self> {
        normalize(value)
    }
}

impl From<CatalogPath> for String {
    fn from(path: CatalogPath) -> Self {
        path.0
    }
}

/// Normalize an absolute path.
///
/// Rejects empty and relative input and interior empty segments. A single
/// trailing `/` is stripped unless the input is the root itself.
pub fn normalize(input: &str) -> GridResult<CatalogPath> {
    let invalid = |reason: &str| GridError::InvalidPath {
        path: input.to_string(),
        reason: reason.to_string(),
    };

    if input.is_empty() {
        return Err(invalid("path is empty"));
    }
    if !input.starts_with('/') {
        return Err(invalid("path is not absolute"));
    }
    if input == "/" {
        return Ok(CatalogPath::root());
    }

    let trimmed = input.strip_suffix('/').unwrap_or(input);
    if trimmed[1..].split('/').any(str::is_empty) {
        return Err(invalid("path contains an empty segment"));
    }

    Ok(CatalogPath(trimmed.to_string()))
}

/// Split a path into its parent and final segment.
///
/// The root splits into `("/", "")`.
pub fn split(path: &CatalogPath) -> (CatalogPath, String) {
    if path.is_root() {
        return (CatalogPath::root(), String::new());
    }
    // normalized paths always contain at least the leading '/'
    let idx = path.0.rfind('/').unwrap_or(0);
    let parent = if idx == 0 {
        CatalogPath::root()
    } else {
        CatalogPath(path.0[..idx].to_string())
    };
    (parent, path.0[idx + 1..].to_string())
}

/// True iff `b` equals `a` or begins with `a + "/"`
pub fn is_prefix(a: &CatalogPath, b: &CatalogPath) -> bool {
    if a.is_root() {
        return true;
    }
    match b.0.strip_prefix(a.0.as_str()) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_trailing_slash() {
        let path = normalize("/tempZone/home/alice/").unwrap();
        assert_eq!(path.as_str(), "/tempZone/home/alice");
    }

    #[test]
    fn test_normalize_root() {
        assert_eq!(normalize("/").unwrap().as_str(), "/");
        assert!(normalize("/").unwrap().is_root());
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        for input in ["", "tempZone/home", "/tempZone//home", "//", "/a/b//"] {
            let err = normalize(input).unwrap_err();
            assert!(
                matches!(err, GridError::InvalidPath { .. }),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for input in ["/", "/a", "/a/", "/tempZone/home/alice/", "/x/y/z"] {
            let once = normalize(input).unwrap();
            let twice = normalize(once.as_str()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_split() {
        let (parent, name) = split(&normalize("/tempZone/home/alice").unwrap());
        assert_eq!(parent.as_str(), "/tempZone/home");
        assert_eq!(name, "alice");

        let (parent, name) = split(&normalize("/tempZone").unwrap());
        assert!(parent.is_root());
        assert_eq!(name, "tempZone");

        let (parent, name) = split(&CatalogPath::root());
        assert!(parent.is_root());
        assert_eq!(name, "");
    }

    #[test]
    fn test_is_prefix() {
        let home = normalize("/tempZone/home").unwrap();
        assert!(is_prefix(&home, &normalize("/tempZone/home").unwrap()));
        assert!(is_prefix(&home, &normalize("/tempZone/home/alice").unwrap()));
        assert!(!is_prefix(&home, &normalize("/tempZone/homer").unwrap()));
        assert!(!is_prefix(&home, &normalize("/tempZone").unwrap()));
        assert!(is_prefix(&CatalogPath::root(), &home));
    }

    #[test]
    fn test_join_and_name() {
        let zone = normalize("/tempZone").unwrap();
        let home = zone.join("home").unwrap();
        assert_eq!(home.as_str(), "/tempZone/home");
        assert_eq!(home.name(), "home");
        assert!(zone.is_parent_of(&home));
        assert_eq!(CatalogPath::root().join("tempZone").unwrap(), zone);
        assert!(zone.join("a/b").is_err());
        assert!(zone.join("").is_err());
    }

    #[test]
    fn test_serde_rejects_relative() {
        let ok: CatalogPath = serde_json::from_str("\"/a/b/\"").unwrap();
        assert_eq!(ok.as_str(), "/a/b");
        assert!(serde_json::from_str::<CatalogPath>("\"a/b\"").is_err());
    }
}
