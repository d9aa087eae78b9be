//! Retrieve engine
//!
//! Point lookup, sharded parallel multi-get, and filtered/paginated range
//! queries with OR-clause deduplication, a stable opaque cursor, and a
//! fetch-limit safety valve.

pub mod plan;

use crate::backend::{AccessChecker, Action};
use crate::cache::is_hot_query;
use crate::context::OpContext;
use crate::gateway::RequestGateway;
use crate::model::{
    clause_matches, validate_filter, CountResult, Cursor, DocUri, Document, Filter, ResultSet,
};
use crate::task::Executor;
use plan::plan_clause;
use std::collections::HashMap;
use std::sync::Arc;

pub struct RetrieveEngine {
    gateway: Arc<RequestGateway>,
    access: Arc<dyn AccessChecker>,
    executor: Executor,
}

struct ScanOutcome {
    docs: Vec<Document>,
    matched: usize,
    cursor: Option<Cursor>,
    fetch_limit_exceeded: bool,
}

impl RetrieveEngine {
    pub fn new(
        gateway: Arc<RequestGateway>,
        access: Arc<dyn AccessChecker>,
        executor: Executor,
    ) -> Self {
        Self {
            gateway,
            access,
            executor,
        }
    }

    /// Point lookup: uri (canonical or alias) to document
    ///
    /// An unauthorized result is suppressed and reads as not-found, never as
    /// an error.
    pub async fn get(&self, uri: &DocUri, ctx: &OpContext) -> crate::Result<Option<Document>> {
        if self.gateway.config().access_log {
            tracing::info!(op_id = %ctx.op_id, principal = %ctx.identity.principal, uri = %uri, "get");
        }

        let doc = match ctx.cache.get_body(uri) {
            Some(cached) => cached,
            None => {
                let fetched = self.fetch_resolved(uri, ctx).await?;
                ctx.cache.put_body(uri, fetched.clone());
                fetched
            }
        };

        let doc = match doc {
            Some(d) => d,
            None => return Ok(None),
        };
        if !self
            .access
            .check(&doc.uri, Action::Read, &ctx.identity)
            .await
            .is_allowed()
        {
            tracing::debug!(uri = %uri, "read suppressed by authorization");
            return Ok(None);
        }
        Ok(Some(doc))
    }

    /// Resolve through the directory, then fetch the body from its owning
    /// shard
    async fn fetch_resolved(
        &self,
        uri: &DocUri,
        ctx: &OpContext,
    ) -> crate::Result<Option<Document>> {
        let record = match ctx.cache.get_record(uri) {
            Some(cached) => cached,
            None => {
                let records = self.gateway.resolve_ids(std::slice::from_ref(uri)).await?;
                let record = records.get(uri).cloned();
                ctx.cache.put_record(uri, record.clone());
                record
            }
        };
        let id = match record.as_ref().and_then(|r| r.current()) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        self.gateway.get_body(&id.uri).await
    }

    /// Batched multi-get: one directory resolve, body fetches grouped by
    /// owning shard and issued in parallel, results reassembled in caller
    /// order with `None` for unresolved or unauthorized keys
    pub async fn multi_get(
        &self,
        uris: &[DocUri],
        ctx: &OpContext,
    ) -> crate::Result<Vec<Option<Document>>> {
        if self.gateway.config().access_log {
            tracing::info!(op_id = %ctx.op_id, principal = %ctx.identity.principal, keys = uris.len(), "multi_get");
        }
        if uris.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.gateway.resolve_ids(uris).await?;

        // Canonical fetch targets, deduplicated
        let mut canonical: Vec<DocUri> = Vec::new();
        for uri in uris {
            if let Some(id) = records.get(uri).and_then(|r| r.current()) {
                if !canonical.contains(&id.uri) {
                    canonical.push(id.uri.clone());
                }
            }
        }

        let max_batch = self.gateway.config().max_get_batch;
        let groups = self
            .gateway
            .topology()
            .assign_groups(crate::addressing::StoreKind::Body, &canonical)?;

        let mut futs = Vec::new();
        for (endpoint, group) in groups {
            for chunk in group.chunks(max_batch) {
                let gateway = self.gateway.clone();
                let endpoint = endpoint.clone();
                let chunk = chunk.to_vec();
                futs.push(async move {
                    let bodies = gateway.multi_get_at(&endpoint, chunk.clone()).await?;
                    crate::Result::Ok((chunk, bodies))
                });
            }
        }

        let mut by_uri: HashMap<DocUri, Document> = HashMap::new();
        for (chunk, bodies) in self.executor.join_all(futs).await? {
            for (uri, body) in chunk.into_iter().zip(bodies) {
                if let Some(doc) = body {
                    by_uri.insert(uri, doc);
                }
            }
        }

        let mut out = Vec::with_capacity(uris.len());
        for uri in uris {
            let doc = records
                .get(uri)
                .and_then(|r| r.current())
                .and_then(|id| by_uri.get(&id.uri));
            match doc {
                Some(doc)
                    if self
                        .access
                        .check(&doc.uri, Action::Read, &ctx.identity)
                        .await
                        .is_allowed() =>
                {
                    out.push(Some(doc.clone()))
                }
                _ => out.push(None),
            }
        }
        Ok(out)
    }

    /// Filtered, paginated range query over `scope`
    pub async fn query(
        &self,
        scope: &DocUri,
        filter: &Filter,
        limit: usize,
        cursor: Option<Cursor>,
        ctx: &OpContext,
    ) -> crate::Result<ResultSet> {
        if self.gateway.config().access_log {
            tracing::info!(op_id = %ctx.op_id, scope = %scope, clauses = filter.len(), limit, "query");
        }
        if limit == 0 {
            return Err(crate::Error::InvalidQuery("limit must be at least 1".into()));
        }

        // Hot queries consult the request-scoped cache on their first page
        let fingerprint = if is_hot_query(scope) && cursor.is_none() {
            let fp = filter_fingerprint(filter, limit);
            if let Some(hit) = ctx.cache.get_hot(scope, &fp) {
                return Ok(hit);
            }
            Some(fp)
        } else {
            None
        };

        let outcome = self
            .scan(
                scope,
                filter,
                Some(limit),
                self.gateway.config().fetch_limit,
                cursor,
                ctx,
                true,
            )
            .await?;

        let result = ResultSet {
            docs: outcome.docs,
            cursor: outcome.cursor,
            fetch_limit_exceeded: outcome.fetch_limit_exceeded,
        };
        if let Some(fp) = fingerprint {
            ctx.cache.put_hot(scope, &fp, result.clone());
        }
        Ok(result)
    }

    /// Count matching documents under `scope`, bounded by a scan budget
    pub async fn count(
        &self,
        scope: &DocUri,
        filter: &Filter,
        budget: Option<usize>,
        cursor: Option<Cursor>,
        ctx: &OpContext,
    ) -> crate::Result<CountResult> {
        let budget = budget.unwrap_or(self.gateway.config().count_budget);
        let outcome = self
            .scan(scope, filter, None, budget, cursor, ctx, false)
            .await?;
        Ok(CountResult {
            count: outcome.matched,
            cursor: outcome.cursor,
        })
    }

    /// Shared clause-iteration loop for query and count
    ///
    /// Pages are sized so the limit can only be reached at a page boundary,
    /// which keeps the continuation token honest: resuming never skips an
    /// id the caller has not seen.
    #[allow(clippy::too_many_arguments)]
    async fn scan(
        &self,
        scope: &DocUri,
        filter: &Filter,
        limit: Option<usize>,
        budget: usize,
        cursor: Option<Cursor>,
        ctx: &OpContext,
        collect: bool,
    ) -> crate::Result<ScanOutcome> {
        validate_filter(filter, self.gateway.config())?;

        let (start_clause, mut start_token) = match cursor {
            Some(c) => {
                c.check_scope(scope.as_str())?;
                if c.clause >= filter.len() {
                    return Err(crate::Error::InvalidQuery(format!(
                        "cursor clause {} out of range for {} clauses",
                        c.clause,
                        filter.len()
                    )));
                }
                (c.clause, c.token)
            }
            None => (0, None),
        };

        let mut docs = Vec::new();
        let mut matched = 0usize;
        let mut scanned = 0usize;
        let mut out_cursor = None;
        let mut fetch_limit_exceeded = false;

        'clauses: for i in start_clause..filter.len() {
            let plan = plan_clause(&filter[i], scope, self.gateway.config());
            let mut token = if i == start_clause {
                start_token.take()
            } else {
                None
            };

            loop {
                // Page sizing: the limit can only be reached at a page
                // boundary, and no page may scan past the remaining budget
                let page = match limit {
                    Some(l) => l - matched,
                    None => self.gateway.config().max_get_batch,
                }
                .min(budget - scanned)
                .max(1);

                let (uris, next) = self.gateway.index_scan(&plan.edited, token, page).await?;
                scanned += uris.len();

                if !uris.is_empty() {
                    let bodies = self.gateway.multi_get_bodies(&uris).await?;
                    for uri in &uris {
                        let doc = match bodies.get(uri) {
                            Some(d) => d,
                            None => continue,
                        };
                        if !plan.residual.iter().all(|c| c.matches(doc)) {
                            continue;
                        }
                        // A document already satisfied by an earlier clause
                        // of this query is not re-emitted
                        if filter[..i].iter().any(|cl| clause_matches(cl, doc)) {
                            continue;
                        }
                        if !self
                            .access
                            .check(&doc.uri, Action::Read, &ctx.identity)
                            .await
                            .is_allowed()
                        {
                            continue;
                        }
                        matched += 1;
                        if collect {
                            docs.push(doc.clone());
                        }
                    }
                }

                let clause_done = next.is_none();
                let all_done = clause_done && i + 1 == filter.len();
                let limit_hit = limit.map_or(false, |l| matched >= l);
                // Crossing the ceiling with work left forces an early return
                let budget_hit = scanned >= budget && !all_done;

                if limit_hit || budget_hit {
                    fetch_limit_exceeded = budget_hit;
                    out_cursor = if !clause_done {
                        Some(Cursor::new(scope.as_str(), i, next))
                    } else if i + 1 < filter.len() {
                        Some(Cursor::new(scope.as_str(), i + 1, None))
                    } else {
                        None
                    };
                    break 'clauses;
                }
                if clause_done {
                    break;
                }
                token = next;
            }
        }

        if fetch_limit_exceeded {
            tracing::warn!(
                scope = %scope,
                scanned,
                budget,
                "range query crossed the fetch-limit ceiling"
            );
        }

        Ok(ScanOutcome {
            docs,
            matched,
            cursor: out_cursor,
            fetch_limit_exceeded,
        })
    }
}

/// Stable fingerprint for hot-query cache keys
fn filter_fingerprint(filter: &Filter, limit: usize) -> String {
    let body = serde_json::to_string(filter).unwrap_or_default();
    format!("{}:{}", blake3::hash(body.as_bytes()), limit)
}
