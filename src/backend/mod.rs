//! Backend collaborator interfaces
//!
//! Everything the orchestration engine talks to lives behind a trait here:
//! the five backend store pools (one wire surface, [`Transport`]), the
//! authorization collaborator, the lock store, and the post-commit fan-out
//! sink. The engine is correct regardless of what implements these;
//! [`memory`] provides complete in-memory implementations for tests and
//! local development.

pub mod memory;

use crate::addressing::Endpoint;
use crate::context::Identity;
use crate::model::{Condition, DocUri, Document, ManifestRecord, UpdateDescriptor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which index serves an OR-clause's id scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStrategy {
    /// Full-text index
    FullText,
    /// Secondary index over configured payload fields
    Secondary,
    /// Plain directory walk under the query scope
    DirectoryWalk,
}

/// The per-clause "edited condition": the strategy chosen for a clause plus
/// the subset of its predicates the chosen index can satisfy. Predicates not
/// present here are evaluated in memory after the body fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditedClause {
    pub strategy: ScanStrategy,
    /// Query scope: only documents under this URI are scanned
    pub scope: DocUri,
    pub conditions: Vec<Condition>,
}

/// One outbound backend operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackendRequest {
    // === body store ===
    GetBody { uri: DocUri },
    MultiGetBodies { uris: Vec<DocUri> },
    PutBodies { docs: Vec<Document> },
    DeleteBodies { uris: Vec<DocUri> },
    // === canonical-id directory ===
    ResolveIds { uris: Vec<DocUri> },
    WriteRecords { records: Vec<(DocUri, ManifestRecord)> },
    /// Page through the immediate children of `parent`
    ScanChildren {
        parent: DocUri,
        token: Option<String>,
        limit: usize,
    },
    // === index stores ===
    IndexScan {
        clause: EditedClause,
        token: Option<String>,
        limit: usize,
    },
    // === counter/allocator ===
    AllocateIds { parent: DocUri, count: u64 },
    // === connectivity ===
    Ping,
}

impl BackendRequest {
    /// Short operation name for logs
    pub fn op_name(&self) -> &'static str {
        match self {
            BackendRequest::GetBody { .. } => "get_body",
            BackendRequest::MultiGetBodies { .. } => "multi_get_bodies",
            BackendRequest::PutBodies { .. } => "put_bodies",
            BackendRequest::DeleteBodies { .. } => "delete_bodies",
            BackendRequest::ResolveIds { .. } => "resolve_ids",
            BackendRequest::WriteRecords { .. } => "write_records",
            BackendRequest::ScanChildren { .. } => "scan_children",
            BackendRequest::IndexScan { .. } => "index_scan",
            BackendRequest::AllocateIds { .. } => "allocate_ids",
            BackendRequest::Ping => "ping",
        }
    }
}

/// Response to a [`BackendRequest`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackendResponse {
    Body(Option<Document>),
    /// Parallel to the requested uris; `None` where no body exists
    Bodies(Vec<Option<Document>>),
    Records(HashMap<DocUri, ManifestRecord>),
    /// Canonical URIs of matching documents plus a backend-native
    /// continuation token when the scan did not finish
    Scan {
        uris: Vec<DocUri>,
        token: Option<String>,
    },
    /// Contiguous id block `[start, start + count)`
    Allocated { start: u64, count: u64 },
    Unit,
}

/// Uniform wire surface over every backend server pool
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: BackendRequest,
    ) -> crate::Result<BackendResponse>;
}

/// Action being authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Create,
    Delete,
}

/// Authorization outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Authorization collaborator, consulted before returning lookup results and
/// before accepting each write target
#[async_trait]
pub trait AccessChecker: Send + Sync {
    async fn check(&self, uri: &DocUri, action: Action, identity: &Identity) -> Decision;
}

/// Keyed mutual-exclusion collaborator (a generic KV cache). Advisory: a
/// crash leaves a time-bounded stale lock, not a deadlock.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Returns true if the lock was acquired, false if already held
    async fn set_if_absent(&self, key: &str, owner: &str) -> crate::Result<bool>;
    async fn delete(&self, key: &str) -> crate::Result<()>;
    async fn set_expiry(&self, key: &str, secs: u64) -> crate::Result<()>;
}

/// Post-commit fan-out boundary. The update engine invokes this exactly once
/// per successful batch, after the directory write, with the full descriptor
/// list. Ordering and idempotence downstream are the consumers' concern.
#[async_trait]
pub trait FanoutSink: Send + Sync {
    async fn submit(
        &self,
        descriptors: Vec<UpdateDescriptor>,
        identity: &Identity,
    ) -> crate::Result<()>;
}
