//! Data model: URIs, documents, directory records, filters, cursors,
//! update descriptors

pub mod condition;
pub mod cursor;
pub mod descriptor;
pub mod document;
pub mod uri;

pub use condition::{clause_matches, validate_filter, Condition, ConditionOp, Filter};
pub use cursor::Cursor;
pub use descriptor::{UpdateDescriptor, UpdateKind, WriteRequest};
pub use document::{CanonicalId, Document, ManifestRecord};
pub use uri::{DocUri, AUTO_NUMBER_MARKER};

use serde::{Deserialize, Serialize};

/// Ordered documents returned by a range query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    pub docs: Vec<Document>,
    /// Continuation cursor, present when more results may exist
    pub cursor: Option<Cursor>,
    /// Set when the call crossed the configured fetch-limit ceiling
    pub fetch_limit_exceeded: bool,
}

/// Result of a count query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountResult {
    pub count: usize,
    /// Continuation cursor when the scan budget ran out first
    pub cursor: Option<Cursor>,
}
