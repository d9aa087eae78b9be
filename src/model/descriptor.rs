//! Update descriptors: what a write batch did, for post-commit consumers

use crate::model::document::Document;
use crate::model::uri::DocUri;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Insert,
    Update,
    Delete,
}

/// Per-document record of one committed operation: kind plus pre-image and
/// post-image, consumed by post-commit fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    pub kind: UpdateKind,
    pub uri: DocUri,
    pub before: Option<Document>,
    pub after: Option<Document>,
}

impl UpdateDescriptor {
    pub fn insert(after: Document) -> Self {
        Self {
            kind: UpdateKind::Insert,
            uri: after.uri.clone(),
            before: None,
            after: Some(after),
        }
    }

    pub fn update(before: Document, after: Document) -> Self {
        Self {
            kind: UpdateKind::Update,
            uri: after.uri.clone(),
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn delete(before: Document) -> Self {
        Self {
            kind: UpdateKind::Delete,
            uri: before.uri.clone(),
            before: Some(before),
            after: None,
        }
    }
}

/// Caller input to the update engine
///
/// `payload: None` requests a delete. A revision, when present, is the
/// optimistic-concurrency expectation checked against the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub uri: DocUri,
    #[serde(default)]
    pub revision: Option<u64>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub aliases: Vec<DocUri>,
}

impl WriteRequest {
    /// Insert or update with the given payload
    pub fn put(uri: DocUri, payload: serde_json::Value) -> Self {
        Self {
            uri,
            revision: None,
            payload: Some(payload),
            aliases: Vec::new(),
        }
    }

    /// Delete the document at `uri`
    pub fn delete(uri: DocUri) -> Self {
        Self {
            uri,
            revision: None,
            payload: None,
            aliases: Vec::new(),
        }
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<DocUri>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn is_delete(&self) -> bool {
        self.payload.is_none()
    }
}
