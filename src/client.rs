//! Client facade
//!
//! `StoreClient` is the composition root: it validates the configuration,
//! wires the gateway, engines, and collaborators together, and exposes the
//! public operation surface. Every call takes an [`OpContext`] so the
//! acting identity and the request-scoped cache travel with the operation.

use crate::addressing::TopologyRegistry;
use crate::backend::{AccessChecker, FanoutSink, LockStore, Transport};
use crate::common::ClientConfig;
use crate::context::{Identity, OpContext};
use crate::gateway::RequestGateway;
use crate::model::{
    CountResult, Cursor, DocUri, Document, Filter, ResultSet, UpdateDescriptor, WriteRequest,
};
use crate::retrieve::RetrieveEngine;
use crate::task::Executor;
use crate::update::UpdateEngine;
use std::sync::Arc;

pub struct StoreClient {
    gateway: Arc<RequestGateway>,
    retrieve: RetrieveEngine,
    update: Arc<UpdateEngine>,
}

impl StoreClient {
    /// Wire a client from its collaborators. Fails fast on an invalid
    /// configuration.
    pub fn new(
        transport: Arc<dyn Transport>,
        topology: TopologyRegistry,
        access: Arc<dyn AccessChecker>,
        locks: Arc<dyn LockStore>,
        fanout: Arc<dyn FanoutSink>,
        config: ClientConfig,
    ) -> crate::Result<Self> {
        config.validate()?;
        tracing::info!(
            workers = config.max_workers,
            timeout_ms = config.request_timeout_ms,
            "store client configured"
        );

        let executor = Executor::new(config.max_workers);
        let gateway = Arc::new(RequestGateway::new(transport, topology, config));
        let retrieve = RetrieveEngine::new(gateway.clone(), access.clone(), executor.clone());
        let update = Arc::new(UpdateEngine::new(
            gateway.clone(),
            access,
            locks,
            fanout,
            executor,
        ));
        Ok(Self {
            gateway,
            retrieve,
            update,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        self.gateway.config()
    }

    /// Fresh context for one logical operation
    pub fn context(&self, identity: Identity) -> OpContext {
        OpContext::new(identity)
    }

    /// Startup connectivity probe across every configured endpoint
    pub async fn probe(&self) -> crate::Result<()> {
        self.gateway.probe().await
    }

    /// Point lookup by canonical URI or alias
    pub async fn get(&self, uri: &DocUri, ctx: &OpContext) -> crate::Result<Option<Document>> {
        self.retrieve.get(uri, ctx).await
    }

    /// Batched lookup; results parallel to `uris`
    pub async fn multi_get(
        &self,
        uris: &[DocUri],
        ctx: &OpContext,
    ) -> crate::Result<Vec<Option<Document>>> {
        self.retrieve.multi_get(uris, ctx).await
    }

    /// Filtered, paginated query under `scope`
    pub async fn query(
        &self,
        scope: &DocUri,
        filter: &Filter,
        limit: usize,
        cursor: Option<Cursor>,
        ctx: &OpContext,
    ) -> crate::Result<ResultSet> {
        self.retrieve.query(scope, filter, limit, cursor, ctx).await
    }

    /// Budgeted count under `scope`
    pub async fn count(
        &self,
        scope: &DocUri,
        filter: &Filter,
        budget: Option<usize>,
        cursor: Option<Cursor>,
        ctx: &OpContext,
    ) -> crate::Result<CountResult> {
        self.retrieve.count(scope, filter, budget, cursor, ctx).await
    }

    /// One write batch as a logical unit
    pub async fn write(
        &self,
        batch: Vec<WriteRequest>,
        ctx: &OpContext,
    ) -> crate::Result<Vec<UpdateDescriptor>> {
        self.update.execute(batch, ctx).await
    }

    /// Insert or update a single document
    pub async fn put(
        &self,
        uri: DocUri,
        payload: serde_json::Value,
        ctx: &OpContext,
    ) -> crate::Result<UpdateDescriptor> {
        let mut descriptors = self
            .update
            .execute(vec![WriteRequest::put(uri, payload)], ctx)
            .await?;
        descriptors
            .pop()
            .ok_or_else(|| crate::Error::Internal("write produced no descriptor".into()))
    }

    /// Delete a single document (or shed an alias when `uri` is one)
    pub async fn delete(&self, uri: DocUri, ctx: &OpContext) -> crate::Result<UpdateDescriptor> {
        let mut descriptors = self
            .update
            .execute(vec![WriteRequest::delete(uri)], ctx)
            .await?;
        descriptors
            .pop()
            .ok_or_else(|| crate::Error::Internal("delete produced no descriptor".into()))
    }

    /// Recursively delete everything under `root`; `keep_root` leaves the
    /// root document itself in place
    pub async fn delete_tree(
        &self,
        root: &DocUri,
        keep_root: bool,
        ctx: &OpContext,
    ) -> crate::Result<usize> {
        self.update.clone().delete_tree(root, ctx, keep_root).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::Endpoint;
    use crate::backend::memory::{AllowAll, MemoryBackend, MemoryLockStore};
    use crate::fanout::NullFanout;
    use serde_json::json;

    fn client() -> (Arc<MemoryBackend>, StoreClient) {
        let backend = Arc::new(MemoryBackend::new());
        let mut config = ClientConfig::default();
        config.retry_backoff_ms = 1;
        config.retry_backoff_step_ms = 1;
        config.bulk_backoff_ms = 1;
        let topology = TopologyRegistry::uniform(vec![
            Endpoint::new("ep-0", "mem://0"),
            Endpoint::new("ep-1", "mem://1"),
        ]);
        let client = StoreClient::new(
            backend.clone(),
            topology,
            Arc::new(AllowAll),
            Arc::new(MemoryLockStore::new()),
            Arc::new(NullFanout),
            config,
        )
        .unwrap();
        (backend, client)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ClientConfig::default();
        config.max_workers = 0;
        let result = StoreClient::new(
            Arc::new(MemoryBackend::new()),
            TopologyRegistry::uniform(vec![Endpoint::new("ep-0", "mem://0")]),
            Arc::new(AllowAll),
            Arc::new(MemoryLockStore::new()),
            Arc::new(NullFanout),
            config,
        );
        assert!(matches!(result.err(), Some(crate::Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let (_, client) = client();
        let ctx = client.context(Identity::new("alice"));
        let uri = DocUri::parse("/notes/today").unwrap();
        client
            .put(
                DocUri::parse("/notes").unwrap(),
                json!({"kind": "folder"}),
                &ctx,
            )
            .await
            .unwrap();
        client.put(uri.clone(), json!({"body": "hi"}), &ctx).await.unwrap();

        // The write invalidated this op's cached miss, so the read sees it
        let got = client.get(&uri, &ctx).await.unwrap().unwrap();
        assert_eq!(got.payload, json!({"body": "hi"}));
        assert_eq!(got.author, "alice");

        client.delete(uri.clone(), &ctx).await.unwrap();
        assert!(client.get(&uri, &ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_probe_succeeds_against_memory_fleet() {
        let (_, client) = client();
        client.probe().await.unwrap();
    }
}
