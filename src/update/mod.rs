//! Update engine
//!
//! The write path: per-key exclusive locks, canonical-id resolution with
//! optimistic-concurrency validation, hierarchy and alias consistency
//! checks, the dual-store write (bodies then directory), and post-commit
//! fan-out submission. One batch of Insert/Update/Delete requests is one
//! logical unit: either every document's checks pass and both stores are
//! written, or nothing is observably changed.

pub mod folder;

mod edit;

use crate::backend::{AccessChecker, Action, FanoutSink, LockStore};
use crate::context::OpContext;
use crate::gateway::RequestGateway;
use crate::model::{
    CanonicalId, DocUri, Document, UpdateDescriptor, UpdateKind, WriteRequest,
};
use crate::task::Executor;
use edit::{check_and_edit, EditContext, EditOutcome};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

const LOCK_PREFIX: &str = "qlock:";

pub struct UpdateEngine {
    gateway: Arc<RequestGateway>,
    access: Arc<dyn AccessChecker>,
    locks: Arc<dyn LockStore>,
    fanout: Arc<dyn FanoutSink>,
    executor: Executor,
}

/// One batch entry after classification: operation kind, canonical target,
/// and everything check-and-edit needs
#[derive(Debug, Clone)]
pub(crate) struct ClassifiedOp {
    pub kind: UpdateKind,
    /// Canonical target URI (post auto-numbering, post alias rewrite)
    pub uri: DocUri,
    pub expected_revision: Option<u64>,
    pub payload: Option<serde_json::Value>,
    /// Desired aliases; empty on Update means "keep the previous set"
    pub aliases: Vec<DocUri>,
    /// Set when a Delete arrived via an alias: drop this alias, keep the
    /// document
    pub drop_alias: Option<DocUri>,
}

impl UpdateEngine {
    pub fn new(
        gateway: Arc<RequestGateway>,
        access: Arc<dyn AccessChecker>,
        locks: Arc<dyn LockStore>,
        fanout: Arc<dyn FanoutSink>,
        executor: Executor,
    ) -> Self {
        Self {
            gateway,
            access,
            locks,
            fanout,
            executor,
        }
    }

    pub(crate) fn gateway(&self) -> &Arc<RequestGateway> {
        &self.gateway
    }

    /// Execute one write batch as a logical unit
    ///
    /// Returns the update descriptors submitted to post-commit fan-out.
    pub async fn execute(
        &self,
        batch: Vec<WriteRequest>,
        ctx: &OpContext,
    ) -> crate::Result<Vec<UpdateDescriptor>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if self.gateway.config().access_log {
            tracing::info!(
                op_id = %ctx.op_id,
                principal = %ctx.identity.principal,
                size = batch.len(),
                "update batch"
            );
        }

        // Step 1: warm the request-scoped cache with one batched resolve of
        // every uri and parent the batch will need. Best-effort: a failed
        // warm just means classification resolves uri by uri.
        if let Err(e) = self.prewarm(&batch, ctx).await {
            tracing::debug!("cache prewarm failed: {}", e);
        }

        // Auto-numbered ids survive whole-batch retries so a retried batch
        // never double-allocates
        let mut assigned: HashMap<usize, DocUri> = HashMap::new();

        let budget = self.gateway.config().bulk_retry_count;
        let backoff = Duration::from_millis(self.gateway.config().bulk_backoff_ms);
        let mut attempt = 0usize;

        // Steps 2-4 retried as one unit on retryable backend errors
        let (ops, held) = loop {
            let ops = match self.classify(&batch, &mut assigned, ctx).await {
                Ok(ops) => ops,
                Err(e) if e.is_retryable() && attempt < budget => {
                    attempt += 1;
                    tracing::warn!(attempt, "classify failed, retrying batch: {}", e);
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Step 3: exclusive locks on every canonical target
            let held = self.acquire_locks(&ops, ctx).await?;

            // Step 4: fresh resolve + optimistic-concurrency check
            match self.occ_resolve(&ops, ctx).await {
                Ok(()) => break (ops, held),
                Err(e) => {
                    self.release_locks(&held).await;
                    if e.is_retryable() && attempt < budget {
                        attempt += 1;
                        tracing::warn!(attempt, "occ resolve failed, retrying batch: {}", e);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(e);
                }
            }
        };

        // Steps 5-8 with guaranteed lock release on every path
        let outcome = self.commit(&ops, ctx).await;

        // Step 9: invalidate, release, fan out. The pre-image's aliases are
        // part of the write: a delete tombstones every one of them, and an
        // update rewrites or removes them, so the invalidation set comes
        // from the pre- and post-images, not the request.
        match &outcome {
            Ok(descriptors) => {
                for d in descriptors {
                    for doc in d.before.iter().chain(d.after.iter()) {
                        for uri in doc.all_uris() {
                            ctx.cache.invalidate(&uri);
                        }
                    }
                }
            }
            Err(_) => {
                for op in &ops {
                    ctx.cache.invalidate(&op.uri);
                    for alias in &op.aliases {
                        ctx.cache.invalidate(alias);
                    }
                    if let Some(alias) = &op.drop_alias {
                        ctx.cache.invalidate(alias);
                    }
                }
            }
        }
        self.release_locks(&held).await;

        let descriptors = outcome?;
        self.fanout
            .submit(descriptors.clone(), &ctx.identity)
            .await?;
        Ok(descriptors)
    }

    /// Step 1: one batched lookup covering every uri whose record or parent
    /// the batch will need
    async fn prewarm(&self, batch: &[WriteRequest], ctx: &OpContext) -> crate::Result<()> {
        let mut uris: Vec<DocUri> = Vec::new();
        let mut push = |uri: DocUri| {
            if !uris.contains(&uri) {
                uris.push(uri);
            }
        };
        for req in batch {
            if !req.uri.is_auto_numbered() {
                push(req.uri.clone());
            }
            if let Some(parent) = req.uri.parent() {
                if !parent.is_root() {
                    push(parent.clone());
                }
            }
            for alias in &req.aliases {
                push(alias.clone());
                if let Some(parent) = alias.parent() {
                    if !parent.is_root() {
                        push(parent);
                    }
                }
            }
        }
        if uris.is_empty() {
            return Ok(());
        }
        let records = self.gateway.resolve_ids(&uris).await?;
        for uri in &uris {
            ctx.cache.put_record(uri, records.get(uri).cloned());
        }
        Ok(())
    }

    /// Cache-aware directory resolve of a single uri
    async fn resolve_cached(
        &self,
        uri: &DocUri,
        ctx: &OpContext,
    ) -> crate::Result<Option<CanonicalId>> {
        if let Some(cached) = ctx.cache.get_record(uri) {
            return Ok(cached.and_then(|r| r.current().cloned()));
        }
        let records = self.gateway.resolve_ids(std::slice::from_ref(uri)).await?;
        let record = records.get(uri).cloned();
        ctx.cache.put_record(uri, record.clone());
        Ok(record.and_then(|r| r.current().cloned()))
    }

    /// Step 2: classify every request as Insert/Update/Delete, run access
    /// checks, rewrite alias deletes, and allocate auto-numbered ids
    async fn classify(
        &self,
        batch: &[WriteRequest],
        assigned: &mut HashMap<usize, DocUri>,
        ctx: &OpContext,
    ) -> crate::Result<Vec<ClassifiedOp>> {
        let mut ops: Vec<ClassifiedOp> = Vec::with_capacity(batch.len());
        // Auto-numbered inserts, by batch index, grouped per parent
        let mut pending_auto: HashMap<DocUri, Vec<usize>> = HashMap::new();

        for (idx, req) in batch.iter().enumerate() {
            if req.uri.is_auto_numbered() {
                if req.is_delete() {
                    return Err(crate::Error::InvalidUri(format!(
                        "cannot delete an auto-numbered target: {}",
                        req.uri
                    )));
                }
                // Access check against the synthetic create-under-parent uri
                self.check_access(&req.uri, Action::Create, ctx).await?;
                if let Some(uri) = assigned.get(&idx) {
                    // Allocated on a previous attempt of this same batch
                    ops.push(ClassifiedOp {
                        kind: UpdateKind::Insert,
                        uri: uri.clone(),
                        expected_revision: None,
                        payload: req.payload.clone(),
                        aliases: req.aliases.clone(),
                        drop_alias: None,
                    });
                } else {
                    let parent = req.uri.parent().ok_or_else(|| {
                        crate::Error::InvalidUri(format!("no parent for {}", req.uri))
                    })?;
                    pending_auto.entry(parent).or_default().push(idx);
                    // Placeholder, patched after allocation
                    ops.push(ClassifiedOp {
                        kind: UpdateKind::Insert,
                        uri: req.uri.clone(),
                        expected_revision: None,
                        payload: req.payload.clone(),
                        aliases: req.aliases.clone(),
                        drop_alias: None,
                    });
                }
                continue;
            }

            let current = self.resolve_cached(&req.uri, ctx).await?;

            if req.is_delete() {
                let current = current
                    .ok_or_else(|| crate::Error::NotFound(req.uri.as_str().to_string()))?;
                self.check_access(&current.uri, Action::Delete, ctx).await?;
                if current.uri != req.uri {
                    // Delete arrived via an alias: drop the alias, keep the
                    // document
                    ops.push(ClassifiedOp {
                        kind: UpdateKind::Update,
                        uri: current.uri.clone(),
                        expected_revision: req.revision,
                        payload: None,
                        aliases: Vec::new(),
                        drop_alias: Some(req.uri.clone()),
                    });
                } else {
                    ops.push(ClassifiedOp {
                        kind: UpdateKind::Delete,
                        uri: req.uri.clone(),
                        expected_revision: req.revision,
                        payload: None,
                        aliases: Vec::new(),
                        drop_alias: None,
                    });
                }
                continue;
            }

            match current {
                Some(id) => {
                    // An update through an alias edits the canonical document
                    self.check_access(&id.uri, Action::Write, ctx).await?;
                    ops.push(ClassifiedOp {
                        kind: UpdateKind::Update,
                        uri: id.uri.clone(),
                        expected_revision: req.revision,
                        payload: req.payload.clone(),
                        aliases: req.aliases.clone(),
                        drop_alias: None,
                    });
                }
                None => {
                    // A revision marker implies the caller expected the
                    // document to exist
                    if req.revision.is_some() {
                        return Err(crate::Error::NotFound(req.uri.as_str().to_string()));
                    }
                    self.check_access(&req.uri, Action::Create, ctx).await?;
                    ops.push(ClassifiedOp {
                        kind: UpdateKind::Insert,
                        uri: req.uri.clone(),
                        expected_revision: None,
                        payload: req.payload.clone(),
                        aliases: req.aliases.clone(),
                        drop_alias: None,
                    });
                }
            }
        }

        // Auto-numbered ids: one batched allocation call per distinct
        // parent, after validation
        for (parent, indices) in pending_auto {
            let start = self
                .gateway
                .allocate_ids(&parent, indices.len() as u64)
                .await?;
            for (offset, idx) in indices.into_iter().enumerate() {
                let uri = batch[idx].uri.with_allocated_leaf(start + offset as u64)?;
                assigned.insert(idx, uri.clone());
                ops[idx].uri = uri;
            }
        }

        // Two requests may not target the same canonical document
        let mut seen: HashSet<&DocUri> = HashSet::new();
        for op in &ops {
            if !seen.insert(&op.uri) {
                return Err(crate::Error::DuplicateKey(format!(
                    "{} targeted twice in one batch",
                    op.uri
                )));
            }
        }

        Ok(ops)
    }

    async fn check_access(
        &self,
        uri: &DocUri,
        action: Action,
        ctx: &OpContext,
    ) -> crate::Result<()> {
        match self.access.check(uri, action, &ctx.identity).await {
            crate::backend::Decision::Allow => Ok(()),
            crate::backend::Decision::Deny(reason) => Err(crate::Error::AccessDenied {
                uri: uri.as_str().to_string(),
                reason,
            }),
        }
    }

    /// Step 3: lock every canonical target, in sorted order; any busy lock
    /// aborts the batch after releasing what was already acquired
    async fn acquire_locks(
        &self,
        ops: &[ClassifiedOp],
        ctx: &OpContext,
    ) -> crate::Result<Vec<String>> {
        let mut keys: Vec<String> = ops
            .iter()
            .map(|op| format!("{}{}", LOCK_PREFIX, op.uri))
            .collect();
        keys.sort();
        keys.dedup();

        let expiry = self.gateway.config().lock_expiry_secs;
        let mut held: Vec<String> = Vec::with_capacity(keys.len());
        for key in keys {
            let acquired = match self.locks.set_if_absent(&key, &ctx.op_id).await {
                Ok(v) => v,
                Err(e) => {
                    self.release_locks(&held).await;
                    return Err(e);
                }
            };
            if !acquired {
                self.release_locks(&held).await;
                return Err(crate::Error::LockBusy(
                    key.trim_start_matches(LOCK_PREFIX).to_string(),
                ));
            }
            if let Err(e) = self.locks.set_expiry(&key, expiry).await {
                held.push(key);
                self.release_locks(&held).await;
                return Err(e);
            }
            held.push(key);
        }
        Ok(held)
    }

    /// Guaranteed cleanup: best-effort delete of every held lock
    async fn release_locks(&self, held: &[String]) {
        for key in held {
            if let Err(e) = self.locks.delete(key).await {
                tracing::warn!(key = %key, "failed to release lock: {}", e);
            }
        }
    }

    /// Step 4: fresh batched resolve and optimistic-concurrency validation
    async fn occ_resolve(&self, ops: &[ClassifiedOp], ctx: &OpContext) -> crate::Result<()> {
        let targets: Vec<DocUri> = ops.iter().map(|op| op.uri.clone()).collect();
        let records = self.gateway.resolve_ids(&targets).await?;

        for op in ops {
            let record = records.get(&op.uri);
            // Keep the cache in step with what the check just saw
            ctx.cache.put_record(&op.uri, record.cloned());
            let current = record.and_then(|r| r.current());
            match op.kind {
                UpdateKind::Insert => {
                    if current.is_some() {
                        return Err(crate::Error::DuplicateKey(op.uri.as_str().to_string()));
                    }
                }
                UpdateKind::Update | UpdateKind::Delete => {
                    let id = current
                        .ok_or_else(|| crate::Error::NotFound(op.uri.as_str().to_string()))?;
                    if let Some(expected) = op.expected_revision {
                        if expected != id.revision {
                            return Err(crate::Error::RevisionMismatch {
                                uri: op.uri.as_str().to_string(),
                                expected,
                                current: id.revision,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Steps 5-8: pre-image fetch, parallel check-and-edit, body writes,
    /// directory write
    async fn commit(
        &self,
        ops: &[ClassifiedOp],
        ctx: &OpContext,
    ) -> crate::Result<Vec<UpdateDescriptor>> {
        // Step 5: batched pre-image fetch for Update/Delete targets
        let preimage_uris: Vec<DocUri> = ops
            .iter()
            .filter(|op| op.kind != UpdateKind::Insert)
            .map(|op| op.uri.clone())
            .collect();
        let preimages = self.gateway.multi_get_bodies(&preimage_uris).await?;
        for uri in &preimage_uris {
            if !preimages.contains_key(uri) {
                // Directory said current but the body is gone
                return Err(crate::Error::NotFound(uri.as_str().to_string()));
            }
        }

        // Cross-document context for the parallel checks
        let edit_ctx = Arc::new(EditContext::build(ops, &preimages));

        // Step 6: one task per document
        let mut futs = Vec::with_capacity(ops.len());
        for op in ops {
            let op = op.clone();
            let pre = preimages.get(&op.uri).cloned();
            let gateway = self.gateway.clone();
            let edit_ctx = edit_ctx.clone();
            let ctx = ctx.clone();
            futs.push(async move { check_and_edit(op, pre, gateway, edit_ctx, ctx).await });
        }
        let outcomes: Vec<EditOutcome> = self.executor.join_all(futs).await?;

        // Step 7: bodies, batched per owning shard; deletes alongside
        let puts: Vec<Document> = outcomes.iter().filter_map(|o| o.body_put.clone()).collect();
        let deletes: Vec<DocUri> = outcomes
            .iter()
            .filter_map(|o| o.body_delete.clone())
            .collect();
        if !puts.is_empty() {
            self.gateway.put_bodies(puts).await?;
        }
        if !deletes.is_empty() {
            self.gateway.delete_bodies(&deletes).await?;
        }

        // Step 8: the directory write commits the batch. Tombstones first:
        // when an alias moves between two documents of the same batch, the
        // old holder's tombstone must not clobber the new Current entry.
        let mut records: Vec<_> = outcomes.iter().flat_map(|o| o.records.clone()).collect();
        records.sort_by_key(|(_, r)| !r.is_tombstone());
        self.gateway.write_records(records).await?;

        Ok(outcomes.into_iter().map(|o| o.descriptor).collect())
    }
}
