//! Request gateway
//!
//! The single choke point for outbound backend calls: picks the target
//! endpoint via the topology registry, applies the per-call timeout,
//! classifies errors, and runs the bounded linear-backoff retry loop.
//! On retry exhaustion the last error is returned unchanged so callers see
//! the real cause.

use crate::addressing::{StoreKind, TopologyRegistry};
use crate::backend::{BackendRequest, BackendResponse, EditedClause, ScanStrategy, Transport};
use crate::common::ClientConfig;
use crate::model::{DocUri, Document, ManifestRecord};
use crate::addressing::Endpoint;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct RequestGateway {
    transport: Arc<dyn Transport>,
    topology: TopologyRegistry,
    config: ClientConfig,
}

impl RequestGateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        topology: TopologyRegistry,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            topology,
            config,
        }
    }

    pub fn topology(&self) -> &TopologyRegistry {
        &self.topology
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// One backend call under the steady-state retry budget
    pub async fn call(
        &self,
        endpoint: &Endpoint,
        request: BackendRequest,
    ) -> crate::Result<BackendResponse> {
        self.call_with_budget(
            endpoint,
            request,
            self.config.retry_count,
            Duration::from_millis(self.config.retry_backoff_ms),
            Duration::from_millis(self.config.retry_backoff_step_ms),
        )
        .await
    }

    /// Retry loop: bounded attempts, linear backoff `base + attempt * step`
    async fn call_with_budget(
        &self,
        endpoint: &Endpoint,
        request: BackendRequest,
        retries: usize,
        base: Duration,
        step: Duration,
    ) -> crate::Result<BackendResponse> {
        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let attempts = retries + 1;
        let mut last_err = None;

        for attempt in 0..attempts {
            let outcome =
                match tokio::time::timeout(timeout, self.transport.call(endpoint, request.clone()))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(crate::Error::Timeout(format!(
                        "{} toward {} after {:?}",
                        request.op_name(),
                        endpoint.id,
                        timeout
                    ))),
                };

            match outcome {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = base + step * attempt as u32;
                    tracing::warn!(
                        op = request.op_name(),
                        endpoint = %endpoint.id,
                        attempt = attempt + 1,
                        "retryable backend error: {}, retrying in {:?}",
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // Unreachable unless attempts == 0; surface the last error as-is
        Err(last_err.unwrap_or_else(|| crate::Error::Internal("no attempts made".into())))
    }

    /// One-time startup connectivity probe against every configured
    /// endpoint, under its own larger retry budget
    pub async fn probe(&self) -> crate::Result<()> {
        let mut probed: Vec<String> = Vec::new();
        for kind in StoreKind::ALL {
            for endpoint in self.topology.pool(kind) {
                if probed.contains(&endpoint.id) {
                    continue;
                }
                probed.push(endpoint.id.clone());
                self.call_with_budget(
                    endpoint,
                    BackendRequest::Ping,
                    self.config.probe_retry_count,
                    Duration::from_millis(self.config.probe_backoff_ms),
                    Duration::from_millis(self.config.probe_backoff_ms),
                )
                .await?;
                tracing::debug!(endpoint = %endpoint.id, "startup probe ok");
            }
        }
        tracing::info!(endpoints = probed.len(), "startup connectivity probe complete");
        Ok(())
    }

    fn unexpected(op: &str, response: BackendResponse) -> crate::Error {
        crate::Error::Internal(format!("unexpected response to {}: {:?}", op, response))
    }

    // === typed call surface ===

    /// Point body fetch from the shard owning `uri`
    pub async fn get_body(&self, uri: &DocUri) -> crate::Result<Option<Document>> {
        let endpoint = self.topology.assign(StoreKind::Body, uri.as_str())?;
        match self
            .call(&endpoint, BackendRequest::GetBody { uri: uri.clone() })
            .await?
        {
            BackendResponse::Body(doc) => Ok(doc),
            other => Err(Self::unexpected("get_body", other)),
        }
    }

    /// Batched body fetch against one known endpoint; parallel to `uris`
    pub async fn multi_get_at(
        &self,
        endpoint: &Endpoint,
        uris: Vec<DocUri>,
    ) -> crate::Result<Vec<Option<Document>>> {
        match self
            .call(endpoint, BackendRequest::MultiGetBodies { uris })
            .await?
        {
            BackendResponse::Bodies(bodies) => Ok(bodies),
            other => Err(Self::unexpected("multi_get_bodies", other)),
        }
    }

    /// Batched body fetch, grouped by owning shard, results keyed by uri
    pub async fn multi_get_bodies(
        &self,
        uris: &[DocUri],
    ) -> crate::Result<HashMap<DocUri, Document>> {
        let mut out = HashMap::new();
        for (endpoint, group) in self.topology.assign_groups(StoreKind::Body, uris)? {
            for chunk in group.chunks(self.config.max_get_batch) {
                let bodies = self.multi_get_at(&endpoint, chunk.to_vec()).await?;
                for (uri, body) in chunk.iter().zip(bodies) {
                    if let Some(doc) = body {
                        out.insert(uri.clone(), doc);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Write bodies to their owning shards, sub-batched
    pub async fn put_bodies(&self, docs: Vec<Document>) -> crate::Result<()> {
        let uris: Vec<DocUri> = docs.iter().map(|d| d.uri.clone()).collect();
        let mut by_uri: HashMap<DocUri, Document> =
            docs.into_iter().map(|d| (d.uri.clone(), d)).collect();
        for (endpoint, group) in self.topology.assign_groups(StoreKind::Body, &uris)? {
            for chunk in group.chunks(self.config.max_put_batch) {
                let batch: Vec<Document> = chunk
                    .iter()
                    .filter_map(|u| by_uri.remove(u))
                    .collect();
                match self
                    .call(&endpoint, BackendRequest::PutBodies { docs: batch })
                    .await?
                {
                    BackendResponse::Unit => {}
                    other => return Err(Self::unexpected("put_bodies", other)),
                }
            }
        }
        Ok(())
    }

    /// Delete bodies from their owning shards
    pub async fn delete_bodies(&self, uris: &[DocUri]) -> crate::Result<()> {
        for (endpoint, group) in self.topology.assign_groups(StoreKind::Body, uris)? {
            match self
                .call(&endpoint, BackendRequest::DeleteBodies { uris: group })
                .await?
            {
                BackendResponse::Unit => {}
                other => return Err(Self::unexpected("delete_bodies", other)),
            }
        }
        Ok(())
    }

    /// Batched directory resolve, grouped by directory shard. Absent URIs
    /// are simply missing from the result map.
    pub async fn resolve_ids(
        &self,
        uris: &[DocUri],
    ) -> crate::Result<HashMap<DocUri, ManifestRecord>> {
        let mut out = HashMap::new();
        for (endpoint, group) in self.topology.assign_groups(StoreKind::Directory, uris)? {
            for chunk in group.chunks(self.config.max_get_batch) {
                match self
                    .call(
                        &endpoint,
                        BackendRequest::ResolveIds {
                            uris: chunk.to_vec(),
                        },
                    )
                    .await?
                {
                    BackendResponse::Records(records) => out.extend(records),
                    other => return Err(Self::unexpected("resolve_ids", other)),
                }
            }
        }
        Ok(out)
    }

    /// Batched directory record write, grouped by directory shard
    pub async fn write_records(
        &self,
        records: Vec<(DocUri, ManifestRecord)>,
    ) -> crate::Result<()> {
        let uris: Vec<DocUri> = records.iter().map(|(u, _)| u.clone()).collect();
        let mut by_uri: HashMap<DocUri, ManifestRecord> = records.into_iter().collect();
        for (endpoint, group) in self.topology.assign_groups(StoreKind::Directory, &uris)? {
            let batch: Vec<(DocUri, ManifestRecord)> = group
                .into_iter()
                .filter_map(|u| by_uri.remove(&u).map(|r| (u, r)))
                .collect();
            match self
                .call(&endpoint, BackendRequest::WriteRecords { records: batch })
                .await?
            {
                BackendResponse::Unit => {}
                other => return Err(Self::unexpected("write_records", other)),
            }
        }
        Ok(())
    }

    /// Page through the immediate children of `parent` in the directory
    pub async fn scan_children(
        &self,
        parent: &DocUri,
        token: Option<String>,
        limit: usize,
    ) -> crate::Result<(Vec<DocUri>, Option<String>)> {
        let endpoint = self.topology.assign(StoreKind::Directory, parent.as_str())?;
        match self
            .call(
                &endpoint,
                BackendRequest::ScanChildren {
                    parent: parent.clone(),
                    token,
                    limit,
                },
            )
            .await?
        {
            BackendResponse::Scan { uris, token } => Ok((uris, token)),
            other => Err(Self::unexpected("scan_children", other)),
        }
    }

    /// Id scan for one edited clause, routed to the index the clause's
    /// strategy selects
    pub async fn index_scan(
        &self,
        clause: &EditedClause,
        token: Option<String>,
        limit: usize,
    ) -> crate::Result<(Vec<DocUri>, Option<String>)> {
        let kind = match clause.strategy {
            ScanStrategy::FullText => StoreKind::FullText,
            ScanStrategy::Secondary => StoreKind::Index,
            ScanStrategy::DirectoryWalk => StoreKind::Directory,
        };
        let endpoint = self.topology.assign(kind, clause.scope.as_str())?;
        match self
            .call(
                &endpoint,
                BackendRequest::IndexScan {
                    clause: clause.clone(),
                    token,
                    limit,
                },
            )
            .await?
        {
            BackendResponse::Scan { uris, token } => Ok((uris, token)),
            other => Err(Self::unexpected("index_scan", other)),
        }
    }

    /// Allocate a contiguous id block for auto-numbered inserts under
    /// `parent`
    pub async fn allocate_ids(&self, parent: &DocUri, count: u64) -> crate::Result<u64> {
        let endpoint = self.topology.assign(StoreKind::Counter, parent.as_str())?;
        match self
            .call(
                &endpoint,
                BackendRequest::AllocateIds {
                    parent: parent.clone(),
                    count,
                },
            )
            .await?
        {
            BackendResponse::Allocated { start, .. } => Ok(start),
            other => Err(Self::unexpected("allocate_ids", other)),
        }
    }
}
