//! Hierarchical document URIs
//!
//! A `DocUri` is a normalized path like `/accounts/acme/invoices/0007`.
//! A trailing `#` segment marks an auto-numbered insert target
//! (`/invoices/#`), and a `@<revision>` suffix qualifies a URI with the
//! revision the caller last saw.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum URI length in bytes
pub const MAX_URI_LEN: usize = 1024;

/// The auto-number marker segment
pub const AUTO_NUMBER_MARKER: &str = "#";

/// A validated, normalized hierarchical document URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocUri(String);

impl DocUri {
    /// Parse and validate a URI
    pub fn parse(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(crate::Error::InvalidUri("empty uri".into()));
        }
        if !s.starts_with('/') {
            return Err(crate::Error::InvalidUri(format!(
                "uri must start with '/': {}",
                s
            )));
        }
        if s.len() > MAX_URI_LEN {
            return Err(crate::Error::InvalidUri(format!(
                "uri too long ({} bytes, max {})",
                s.len(),
                MAX_URI_LEN
            )));
        }
        if s.chars().any(|c| c.is_control()) {
            return Err(crate::Error::InvalidUri(format!(
                "uri contains control characters: {}",
                s
            )));
        }
        if s.contains('@') {
            return Err(crate::Error::InvalidUri(format!(
                "'@' is reserved for revision qualifiers: {}",
                s
            )));
        }

        // Normalize a trailing slash, then check segments
        let normalized = if s.len() > 1 && s.ends_with('/') {
            &s[..s.len() - 1]
        } else {
            s
        };

        let segments: Vec<&str> = normalized[1..].split('/').collect();
        if normalized != "/" {
            for (i, seg) in segments.iter().enumerate() {
                if seg.is_empty() {
                    return Err(crate::Error::InvalidUri(format!(
                        "empty path segment in {}",
                        s
                    )));
                }
                // The auto-number marker is only legal as the whole last segment
                if seg.contains(AUTO_NUMBER_MARKER)
                    && (*seg != AUTO_NUMBER_MARKER || i != segments.len() - 1)
                {
                    return Err(crate::Error::InvalidUri(format!(
                        "misplaced auto-number marker in {}",
                        s
                    )));
                }
            }
        }

        Ok(DocUri(normalized.to_string()))
    }

    /// Parse a URI that may carry a `@<revision>` qualifier
    ///
    /// `/a/b@3` parses to (`/a/b`, `Some(3)`).
    pub fn parse_qualified(s: &str) -> crate::Result<(Self, Option<u64>)> {
        match s.rsplit_once('@') {
            Some((path, rev)) => {
                let revision: u64 = rev.parse().map_err(|_| {
                    crate::Error::InvalidUri(format!("bad revision qualifier: {}", s))
                })?;
                Ok((Self::parse(path)?, Some(revision)))
            }
            None => Ok((Self::parse(s)?, None)),
        }
    }

    /// The raw path string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The root URI `/`
    pub fn root() -> Self {
        DocUri("/".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Immediate parent, or `None` for the root
    pub fn parent(&self) -> Option<DocUri> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(DocUri::root()),
            Some(idx) => Some(DocUri(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Last path segment
    pub fn leaf(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Number of path segments
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count()
        }
    }

    /// Is `self` a strict ancestor of `other`?
    pub fn is_ancestor_of(&self, other: &DocUri) -> bool {
        if self == other {
            return false;
        }
        if self.is_root() {
            return true;
        }
        other.0.starts_with(&self.0)
            && other.0.as_bytes().get(self.0.len()) == Some(&b'/')
    }

    /// Does this URI end in the auto-number marker?
    pub fn is_auto_numbered(&self) -> bool {
        self.leaf() == AUTO_NUMBER_MARKER
    }

    /// Replace the auto-number marker with an allocated numeric leaf
    pub fn with_allocated_leaf(&self, n: u64) -> crate::Result<DocUri> {
        if !self.is_auto_numbered() {
            return Err(crate::Error::InvalidUri(format!(
                "not an auto-numbered uri: {}",
                self.0
            )));
        }
        let parent = self.parent().ok_or_else(|| {
            crate::Error::InvalidUri("auto-number marker has no parent".into())
        })?;
        let base = if parent.is_root() {
            String::new()
        } else {
            parent.0.clone()
        };
        DocUri::parse(&format!("{}/{:07}", base, n))
    }

    /// Child of this URI with the given leaf segment
    pub fn child(&self, leaf: &str) -> crate::Result<DocUri> {
        let base = if self.is_root() { "" } else { self.0.as_str() };
        DocUri::parse(&format!("{}/{}", base, leaf))
    }
}

impl fmt::Display for DocUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DocUri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DocUri {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        DocUri::parse(&s)
    }
}

impl From<DocUri> for String {
    fn from(uri: DocUri) -> String {
        uri.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_normalize() {
        assert_eq!(DocUri::parse("/a/b").unwrap().as_str(), "/a/b");
        assert_eq!(DocUri::parse("/a/b/").unwrap().as_str(), "/a/b");
        assert_eq!(DocUri::parse("/").unwrap().as_str(), "/");
    }

    #[test]
    fn test_parse_rejects_bad_uris() {
        assert!(DocUri::parse("").is_err());
        assert!(DocUri::parse("a/b").is_err());
        assert!(DocUri::parse("/a//b").is_err());
        assert!(DocUri::parse("/a/b@2").is_err());
        assert!(DocUri::parse("/a/b#c").is_err());
        assert!(DocUri::parse("/a/#/b").is_err());
        assert!(DocUri::parse(&format!("/{}", "x".repeat(2000))).is_err());
    }

    #[test]
    fn test_parse_qualified() {
        let (uri, rev) = DocUri::parse_qualified("/a/b@3").unwrap();
        assert_eq!(uri.as_str(), "/a/b");
        assert_eq!(rev, Some(3));

        let (uri, rev) = DocUri::parse_qualified("/a/b").unwrap();
        assert_eq!(uri.as_str(), "/a/b");
        assert_eq!(rev, None);

        assert!(DocUri::parse_qualified("/a/b@x").is_err());
    }

    #[test]
    fn test_parent_and_depth() {
        let uri = DocUri::parse("/a/b/c").unwrap();
        assert_eq!(uri.parent().unwrap().as_str(), "/a/b");
        assert_eq!(uri.depth(), 3);
        assert_eq!(uri.leaf(), "c");

        let top = DocUri::parse("/a").unwrap();
        assert_eq!(top.parent().unwrap().as_str(), "/");
        assert!(DocUri::root().parent().is_none());
        assert_eq!(DocUri::root().depth(), 0);
    }

    #[test]
    fn test_ancestry() {
        let a = DocUri::parse("/a").unwrap();
        let ab = DocUri::parse("/a/b").unwrap();
        let abc = DocUri::parse("/a/b/c").unwrap();
        let ax = DocUri::parse("/ax").unwrap();

        assert!(a.is_ancestor_of(&ab));
        assert!(a.is_ancestor_of(&abc));
        assert!(DocUri::root().is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&ax));
        assert!(!ab.is_ancestor_of(&a));
    }

    #[test]
    fn test_auto_number() {
        let target = DocUri::parse("/invoices/#").unwrap();
        assert!(target.is_auto_numbered());

        let assigned = target.with_allocated_leaf(7).unwrap();
        assert_eq!(assigned.as_str(), "/invoices/0000007");
        assert!(!assigned.is_auto_numbered());

        let plain = DocUri::parse("/invoices/a").unwrap();
        assert!(plain.with_allocated_leaf(7).is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let uri = DocUri::parse("/a/b").unwrap();
        let json = serde_json::to_string(&uri).unwrap();
        assert_eq!(json, "\"/a/b\"");
        let back: DocUri = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uri);

        assert!(serde_json::from_str::<DocUri>("\"a//b\"").is_err());
    }
}
