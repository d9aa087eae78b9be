//! Request-scoped cache
//!
//! A short-lived map from key to last-read result, owned by one logical
//! operation's [`OpContext`](crate::context::OpContext) and dropped with it.
//! Avoids duplicate backend reads within the operation and supports precise
//! invalidation after writes. Safe for concurrent use from parallel
//! sub-tasks.

use crate::model::{DocUri, Document, ManifestRecord, ResultSet};
use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Range-query scopes hot enough to cache per-operation: service bootstrap
/// settings and account-lookup-by-name. All other range queries bypass the
/// cache.
static HOT_QUERY_SCOPES: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["/system/settings", "/system/accounts/by-name"]);

/// Is this query scope on the hot allow-list?
pub fn is_hot_query(scope: &DocUri) -> bool {
    HOT_QUERY_SCOPES
        .iter()
        .any(|hot| scope.as_str() == *hot || scope.as_str().starts_with(&format!("{}/", hot)))
}

#[derive(Debug, Clone)]
enum Entry {
    /// Last-read body; `None` caches a confirmed miss
    Body(Option<Document>),
    /// Last-read directory record; `None` caches a confirmed miss
    Record(Option<ManifestRecord>),
    /// Result set of a hot range query
    Hot(ResultSet),
}

/// Request-scoped cache for one logical operation
#[derive(Debug, Default)]
pub struct OpCache {
    entries: DashMap<String, Entry>,
}

impl OpCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn body_key(uri: &DocUri) -> String {
        format!("body:{}", uri)
    }

    fn record_key(uri: &DocUri) -> String {
        format!("record:{}", uri)
    }

    fn hot_key(scope: &DocUri, fingerprint: &str) -> String {
        format!("hot:{}:{}", scope, fingerprint)
    }

    // === bodies ===

    /// Cached body lookup; outer `None` means "not cached", inner `None`
    /// means "cached miss"
    pub fn get_body(&self, uri: &DocUri) -> Option<Option<Document>> {
        self.entries.get(&Self::body_key(uri)).and_then(|e| match e.value() {
            Entry::Body(doc) => Some(doc.clone()),
            _ => None,
        })
    }

    pub fn put_body(&self, uri: &DocUri, doc: Option<Document>) {
        self.entries.insert(Self::body_key(uri), Entry::Body(doc));
    }

    // === directory records ===

    pub fn get_record(&self, uri: &DocUri) -> Option<Option<ManifestRecord>> {
        self.entries
            .get(&Self::record_key(uri))
            .and_then(|e| match e.value() {
                Entry::Record(rec) => Some(rec.clone()),
                _ => None,
            })
    }

    pub fn put_record(&self, uri: &DocUri, record: Option<ManifestRecord>) {
        self.entries
            .insert(Self::record_key(uri), Entry::Record(record));
    }

    // === hot query results ===

    pub fn get_hot(&self, scope: &DocUri, fingerprint: &str) -> Option<ResultSet> {
        self.entries
            .get(&Self::hot_key(scope, fingerprint))
            .and_then(|e| match e.value() {
                Entry::Hot(rs) => Some(rs.clone()),
                _ => None,
            })
    }

    pub fn put_hot(&self, scope: &DocUri, fingerprint: &str, result: ResultSet) {
        self.entries
            .insert(Self::hot_key(scope, fingerprint), Entry::Hot(result));
    }

    // === invalidation ===

    /// Drop every entry touching `uri`, including hot result sets that
    /// could contain it
    pub fn invalidate(&self, uri: &DocUri) {
        self.entries.remove(&Self::body_key(uri));
        self.entries.remove(&Self::record_key(uri));
        // Hot result sets are not indexed by member uri; drop them all
        self.entries.retain(|key, _| !key.starts_with("hot:"));
    }

    /// Drop everything; bulk operations call this to bound memory growth
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
