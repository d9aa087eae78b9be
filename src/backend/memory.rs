//! In-memory backend collaborators
//!
//! A complete stand-in fleet: every endpoint reaches the same in-memory
//! state, with a per-endpoint call log so tests can assert routing and
//! batching. Also provides an in-memory lock store and simple access
//! checkers. Used by the crate's own tests and handy for local development.

use crate::addressing::Endpoint;
use crate::backend::{
    Action, BackendRequest, BackendResponse, Decision, EditedClause, Transport,
};
use crate::backend::{AccessChecker, FanoutSink, LockStore};
use crate::common::timestamp_now;
use crate::context::Identity;
use crate::model::{clause_matches, DocUri, Document, ManifestRecord, UpdateDescriptor};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct Fleet {
    bodies: HashMap<DocUri, Document>,
    records: HashMap<DocUri, ManifestRecord>,
    counters: HashMap<DocUri, u64>,
}

/// In-memory [`Transport`] over a shared fleet state
#[derive(Default)]
pub struct MemoryBackend {
    fleet: Mutex<Fleet>,
    calls: Mutex<Vec<(String, &'static str)>>,
    fail_times: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document: body plus directory records for its canonical URI
    /// and every alias
    pub fn insert_fixture(&self, doc: Document) {
        let mut fleet = self.fleet.lock().unwrap();
        let id = doc.canonical_id();
        for uri in doc.all_uris() {
            fleet.records.insert(uri, ManifestRecord::Current(id.clone()));
        }
        fleet.bodies.insert(doc.uri.clone(), doc);
    }

    /// Make the next `n` calls fail with a retryable connection error
    pub fn inject_failures(&self, n: usize) {
        self.fail_times.store(n, Ordering::SeqCst);
    }

    pub fn body(&self, uri: &DocUri) -> Option<Document> {
        self.fleet.lock().unwrap().bodies.get(uri).cloned()
    }

    pub fn record(&self, uri: &DocUri) -> Option<ManifestRecord> {
        self.fleet.lock().unwrap().records.get(uri).cloned()
    }

    pub fn bodies_len(&self) -> usize {
        self.fleet.lock().unwrap().bodies.len()
    }

    /// Snapshot of (endpoint id, operation) calls made so far
    pub fn calls(&self) -> Vec<(String, &'static str)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, o)| *o == op)
            .count()
    }

    fn in_scope(scope: &DocUri, uri: &DocUri) -> bool {
        scope.is_root() || uri == scope || scope.is_ancestor_of(uri)
    }

    /// Scan matching canonical uris in uri order, resuming strictly after
    /// `token`, returning up to `limit` plus a token when more remain
    fn scan_page(
        mut uris: Vec<DocUri>,
        token: Option<&str>,
        limit: usize,
    ) -> (Vec<DocUri>, Option<String>) {
        uris.sort();
        let start = match token {
            Some(t) => uris
                .iter()
                .position(|u| u.as_str() > t)
                .unwrap_or(uris.len()),
            None => 0,
        };
        let end = (start + limit).min(uris.len());
        let page = uris[start..end].to_vec();
        let next = if end < uris.len() {
            page.last().map(|u| u.as_str().to_string())
        } else {
            None
        };
        (page, next)
    }

    fn index_scan(
        &self,
        clause: &EditedClause,
        token: Option<&str>,
        limit: usize,
    ) -> (Vec<DocUri>, Option<String>) {
        let fleet = self.fleet.lock().unwrap();
        let matching: Vec<DocUri> = fleet
            .bodies
            .values()
            .filter(|doc| Self::in_scope(&clause.scope, &doc.uri))
            .filter(|doc| clause_matches(&clause.conditions, doc))
            .map(|doc| doc.uri.clone())
            .collect();
        Self::scan_page(matching, token, limit)
    }

    fn scan_children(
        &self,
        parent: &DocUri,
        token: Option<&str>,
        limit: usize,
    ) -> (Vec<DocUri>, Option<String>) {
        let fleet = self.fleet.lock().unwrap();
        let children: Vec<DocUri> = fleet
            .records
            .iter()
            .filter(|(_, rec)| !rec.is_tombstone())
            .map(|(uri, _)| uri.clone())
            .filter(|uri| uri.parent().as_ref() == Some(parent))
            .collect();
        Self::scan_page(children, token, limit)
    }
}

#[async_trait]
impl Transport for MemoryBackend {
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: BackendRequest,
    ) -> crate::Result<BackendResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.id.clone(), request.op_name()));

        // Failure injection for retry tests
        loop {
            let n = self.fail_times.load(Ordering::SeqCst);
            if n == 0 {
                break;
            }
            if self
                .fail_times
                .compare_exchange(n, n - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(crate::Error::ConnectionFailed(format!(
                    "injected failure toward {}",
                    endpoint.id
                )));
            }
        }

        match request {
            BackendRequest::GetBody { uri } => {
                Ok(BackendResponse::Body(self.body(&uri)))
            }
            BackendRequest::MultiGetBodies { uris } => {
                let fleet = self.fleet.lock().unwrap();
                let bodies = uris.iter().map(|u| fleet.bodies.get(u).cloned()).collect();
                Ok(BackendResponse::Bodies(bodies))
            }
            BackendRequest::PutBodies { docs } => {
                let mut fleet = self.fleet.lock().unwrap();
                for doc in docs {
                    fleet.bodies.insert(doc.uri.clone(), doc);
                }
                Ok(BackendResponse::Unit)
            }
            BackendRequest::DeleteBodies { uris } => {
                let mut fleet = self.fleet.lock().unwrap();
                for uri in uris {
                    fleet.bodies.remove(&uri);
                }
                Ok(BackendResponse::Unit)
            }
            BackendRequest::ResolveIds { uris } => {
                let fleet = self.fleet.lock().unwrap();
                let records = uris
                    .into_iter()
                    .filter_map(|u| fleet.records.get(&u).cloned().map(|r| (u, r)))
                    .collect();
                Ok(BackendResponse::Records(records))
            }
            BackendRequest::WriteRecords { records } => {
                let mut fleet = self.fleet.lock().unwrap();
                for (uri, record) in records {
                    fleet.records.insert(uri, record);
                }
                Ok(BackendResponse::Unit)
            }
            BackendRequest::ScanChildren {
                parent,
                token,
                limit,
            } => {
                let (uris, token) = self.scan_children(&parent, token.as_deref(), limit);
                Ok(BackendResponse::Scan { uris, token })
            }
            BackendRequest::IndexScan {
                clause,
                token,
                limit,
            } => {
                let (uris, token) = self.index_scan(&clause, token.as_deref(), limit);
                Ok(BackendResponse::Scan { uris, token })
            }
            BackendRequest::AllocateIds { parent, count } => {
                let mut fleet = self.fleet.lock().unwrap();
                let next = fleet.counters.entry(parent).or_insert(1);
                let start = *next;
                *next += count;
                Ok(BackendResponse::Allocated { start, count })
            }
            BackendRequest::Ping => Ok(BackendResponse::Unit),
        }
    }
}

/// In-memory advisory lock store
#[derive(Default)]
pub struct MemoryLockStore {
    locks: Mutex<HashMap<String, (String, Option<u64>)>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held(&self, key: &str) -> bool {
        let mut locks = self.locks.lock().unwrap();
        if let Some((_, Some(expires))) = locks.get(key) {
            if *expires <= timestamp_now() {
                locks.remove(key);
                return false;
            }
        }
        locks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(&self, key: &str, owner: &str) -> crate::Result<bool> {
        let mut locks = self.locks.lock().unwrap();
        if let Some((_, Some(expires))) = locks.get(key) {
            // Expired locks from crashed holders are reclaimable
            if *expires <= timestamp_now() {
                locks.remove(key);
            }
        }
        if locks.contains_key(key) {
            return Ok(false);
        }
        locks.insert(key.to_string(), (owner.to_string(), None));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> crate::Result<()> {
        self.locks.lock().unwrap().remove(key);
        Ok(())
    }

    async fn set_expiry(&self, key: &str, secs: u64) -> crate::Result<()> {
        let mut locks = self.locks.lock().unwrap();
        if let Some(entry) = locks.get_mut(key) {
            entry.1 = Some(timestamp_now() + secs);
        }
        Ok(())
    }
}

/// Access checker that allows everything
pub struct AllowAll;

#[async_trait]
impl AccessChecker for AllowAll {
    async fn check(&self, _uri: &DocUri, _action: Action, _identity: &Identity) -> Decision {
        Decision::Allow
    }
}

/// Access checker that denies any URI under the given prefixes
pub struct DenyPrefix {
    prefixes: Vec<String>,
}

impl DenyPrefix {
    pub fn new(prefixes: Vec<&str>) -> Self {
        Self {
            prefixes: prefixes.into_iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl AccessChecker for DenyPrefix {
    async fn check(&self, uri: &DocUri, _action: Action, _identity: &Identity) -> Decision {
        for prefix in &self.prefixes {
            if uri.as_str() == prefix || uri.as_str().starts_with(&format!("{}/", prefix)) {
                return Decision::Deny(format!("denied prefix {}", prefix));
            }
        }
        Decision::Allow
    }
}

/// Fan-out sink that records every submission
#[derive(Default)]
pub struct RecordingFanout {
    submissions: Mutex<Vec<(Vec<UpdateDescriptor>, Identity)>>,
}

impl RecordingFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> Vec<(Vec<UpdateDescriptor>, Identity)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl FanoutSink for RecordingFanout {
    async fn submit(
        &self,
        descriptors: Vec<UpdateDescriptor>,
        identity: &Identity,
    ) -> crate::Result<()> {
        self.submissions
            .lock()
            .unwrap()
            .push((descriptors, identity.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScanStrategy;
    use crate::model::{CanonicalId, Condition};
    use serde_json::json;

    fn ep() -> Endpoint {
        Endpoint::new("ep-0", "mem://0")
    }

    fn doc(uri: &str, payload: serde_json::Value) -> Document {
        Document {
            uri: DocUri::parse(uri).unwrap(),
            revision: 1,
            aliases: vec![],
            payload,
            author: "t".into(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_bodies_round_trip() {
        let backend = MemoryBackend::new();
        backend.insert_fixture(doc("/a/b", json!({"k": 1})));

        let resp = backend
            .call(
                &ep(),
                BackendRequest::GetBody {
                    uri: DocUri::parse("/a/b").unwrap(),
                },
            )
            .await
            .unwrap();
        match resp {
            BackendResponse::Body(Some(d)) => assert_eq!(d.uri.as_str(), "/a/b"),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_omits_absent() {
        let backend = MemoryBackend::new();
        backend.insert_fixture(doc("/a", json!({})));

        let resp = backend
            .call(
                &ep(),
                BackendRequest::ResolveIds {
                    uris: vec![
                        DocUri::parse("/a").unwrap(),
                        DocUri::parse("/missing").unwrap(),
                    ],
                },
            )
            .await
            .unwrap();
        match resp {
            BackendResponse::Records(map) => {
                assert_eq!(map.len(), 1);
                assert!(map.contains_key(&DocUri::parse("/a").unwrap()));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_index_scan_pages_in_order() {
        let backend = MemoryBackend::new();
        for i in 0..7 {
            backend.insert_fixture(doc(&format!("/d/{:02}", i), json!({"kind": "note"})));
        }
        let clause = EditedClause {
            strategy: ScanStrategy::Secondary,
            scope: DocUri::parse("/d").unwrap(),
            conditions: vec![Condition::eq("kind", json!("note"))],
        };

        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = backend
                .call(
                    &ep(),
                    BackendRequest::IndexScan {
                        clause: clause.clone(),
                        token: token.clone(),
                        limit: 3,
                    },
                )
                .await
                .unwrap();
            match resp {
                BackendResponse::Scan { uris, token: next } => {
                    seen.extend(uris);
                    if next.is_none() {
                        break;
                    }
                    token = next;
                }
                other => panic!("unexpected response: {:?}", other),
            }
        }
        assert_eq!(seen.len(), 7);
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
    }

    #[tokio::test]
    async fn test_scan_children_only_immediate() {
        let backend = MemoryBackend::new();
        backend.insert_fixture(doc("/a", json!({})));
        backend.insert_fixture(doc("/a/b", json!({})));
        backend.insert_fixture(doc("/a/b/c", json!({})));

        let resp = backend
            .call(
                &ep(),
                BackendRequest::ScanChildren {
                    parent: DocUri::parse("/a").unwrap(),
                    token: None,
                    limit: 10,
                },
            )
            .await
            .unwrap();
        match resp {
            BackendResponse::Scan { uris, token } => {
                assert_eq!(uris, vec![DocUri::parse("/a/b").unwrap()]);
                assert!(token.is_none());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tombstone_hides_from_child_scan() {
        let backend = MemoryBackend::new();
        backend.insert_fixture(doc("/a/b", json!({})));
        backend
            .call(
                &ep(),
                BackendRequest::WriteRecords {
                    records: vec![(DocUri::parse("/a/b").unwrap(), ManifestRecord::Tombstone)],
                },
            )
            .await
            .unwrap();

        let resp = backend
            .call(
                &ep(),
                BackendRequest::ScanChildren {
                    parent: DocUri::parse("/a").unwrap(),
                    token: None,
                    limit: 10,
                },
            )
            .await
            .unwrap();
        match resp {
            BackendResponse::Scan { uris, .. } => assert!(uris.is_empty()),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_allocate_ids_never_reuses() {
        let backend = MemoryBackend::new();
        let parent = DocUri::parse("/inv").unwrap();
        let first = backend
            .call(
                &ep(),
                BackendRequest::AllocateIds {
                    parent: parent.clone(),
                    count: 3,
                },
            )
            .await
            .unwrap();
        let second = backend
            .call(&ep(), BackendRequest::AllocateIds { parent, count: 2 })
            .await
            .unwrap();
        match (first, second) {
            (
                BackendResponse::Allocated { start: s1, count: c1 },
                BackendResponse::Allocated { start: s2, .. },
            ) => {
                assert_eq!(s1, 1);
                assert_eq!(c1, 3);
                assert_eq!(s2, 4);
            }
            other => panic!("unexpected responses: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = MemoryBackend::new();
        backend.inject_failures(2);
        assert!(backend.call(&ep(), BackendRequest::Ping).await.is_err());
        assert!(backend.call(&ep(), BackendRequest::Ping).await.is_err());
        assert!(backend.call(&ep(), BackendRequest::Ping).await.is_ok());
    }

    #[tokio::test]
    async fn test_lock_store_mutual_exclusion() {
        let locks = MemoryLockStore::new();
        assert!(locks.set_if_absent("k", "a").await.unwrap());
        assert!(!locks.set_if_absent("k", "b").await.unwrap());
        locks.delete("k").await.unwrap();
        assert!(locks.set_if_absent("k", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_expiry_reclaim() {
        let locks = MemoryLockStore::new();
        assert!(locks.set_if_absent("k", "a").await.unwrap());
        // Expiry in the past: the lock is reclaimable
        {
            let mut map = locks.locks.lock().unwrap();
            map.get_mut("k").unwrap().1 = Some(timestamp_now() - 1);
        }
        assert!(locks.set_if_absent("k", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_deny_prefix() {
        let checker = DenyPrefix::new(vec!["/private"]);
        let id = Identity::new("alice");
        assert!(!checker
            .check(&DocUri::parse("/private/x").unwrap(), Action::Read, &id)
            .await
            .is_allowed());
        assert!(checker
            .check(&DocUri::parse("/public/x").unwrap(), Action::Read, &id)
            .await
            .is_allowed());
        // Prefix match is per-segment, not per-byte
        assert!(checker
            .check(&DocUri::parse("/privateer").unwrap(), Action::Read, &id)
            .await
            .is_allowed());
    }

    #[test]
    fn test_fixture_records_cover_aliases() {
        let backend = MemoryBackend::new();
        let mut d = doc("/a", json!({}));
        d.aliases = vec![DocUri::parse("/alias/a").unwrap()];
        backend.insert_fixture(d);

        let rec = backend.record(&DocUri::parse("/alias/a").unwrap()).unwrap();
        assert_eq!(
            rec.current(),
            Some(&CanonicalId::new(DocUri::parse("/a").unwrap(), 1))
        );
    }
}
