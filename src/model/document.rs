//! Documents, canonical ids, and directory records

use crate::model::uri::DocUri;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The pair (canonical URI, revision) identifying one version of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalId {
    pub uri: DocUri,
    pub revision: u64,
}

impl CanonicalId {
    pub fn new(uri: DocUri, revision: u64) -> Self {
        Self { uri, revision }
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.uri, self.revision)
    }
}

/// A versioned document, the store's unit of storage
///
/// Invariant: exactly one canonical URI per document; every alias resolves
/// through the directory to this document's canonical id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub uri: DocUri,
    pub revision: u64,
    #[serde(default)]
    pub aliases: Vec<DocUri>,
    pub payload: serde_json::Value,
    pub author: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    pub fn canonical_id(&self) -> CanonicalId {
        CanonicalId::new(self.uri.clone(), self.revision)
    }

    /// All URIs that must resolve to this document: canonical + aliases
    pub fn all_uris(&self) -> Vec<DocUri> {
        let mut uris = Vec::with_capacity(1 + self.aliases.len());
        uris.push(self.uri.clone());
        uris.extend(self.aliases.iter().cloned());
        uris
    }

    /// Value of a payload field, treating the reserved name `uri` as the
    /// document's own path
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        if name == "uri" {
            return Some(serde_json::Value::String(self.uri.as_str().to_string()));
        }
        self.payload.get(name).cloned()
    }
}

/// A canonical-id directory entry
///
/// The directory is the optimistic-concurrency source of truth: any URI
/// (canonical or alias) maps to the current canonical id, or to a tombstone
/// once the document is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "id")]
pub enum ManifestRecord {
    Current(CanonicalId),
    Tombstone,
}

impl ManifestRecord {
    /// The live canonical id, if any
    pub fn current(&self) -> Option<&CanonicalId> {
        match self {
            ManifestRecord::Current(id) => Some(id),
            ManifestRecord::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, ManifestRecord::Tombstone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(uri: &str, rev: u64) -> Document {
        Document {
            uri: DocUri::parse(uri).unwrap(),
            revision: rev,
            aliases: vec![DocUri::parse("/alias/x").unwrap()],
            payload: json!({"kind": "note", "title": "hello"}),
            author: "tester".to_string(),
            created_at: 1,
            updated_at: 2,
        }
    }

    #[test]
    fn test_canonical_id_display() {
        let id = doc("/a/b", 4).canonical_id();
        assert_eq!(id.to_string(), "/a/b@4");
    }

    #[test]
    fn test_all_uris() {
        let d = doc("/a/b", 1);
        let uris = d.all_uris();
        assert_eq!(uris.len(), 2);
        assert_eq!(uris[0].as_str(), "/a/b");
        assert_eq!(uris[1].as_str(), "/alias/x");
    }

    #[test]
    fn test_field_access() {
        let d = doc("/a/b", 1);
        assert_eq!(d.field("kind"), Some(json!("note")));
        assert_eq!(d.field("uri"), Some(json!("/a/b")));
        assert_eq!(d.field("missing"), None);
    }

    #[test]
    fn test_manifest_record() {
        let id = CanonicalId::new(DocUri::parse("/a").unwrap(), 2);
        let rec = ManifestRecord::Current(id.clone());
        assert_eq!(rec.current(), Some(&id));
        assert!(!rec.is_tombstone());
        assert!(ManifestRecord::Tombstone.current().is_none());
        assert!(ManifestRecord::Tombstone.is_tombstone());
    }
}
