//! Recursive folder delete
//!
//! Walks the directory under a root URI and runs every document found
//! through the ordinary per-document delete path, children strictly before
//! their parent. Sub-trees run as parallel tasks sharing a concurrent
//! visited set, so a document reachable through two alias paths is
//! processed once. Best-effort: sibling failures do not stop the walk, and
//! the first error is raised after every sub-tree was attempted.

use super::UpdateEngine;
use crate::context::OpContext;
use crate::model::{DocUri, WriteRequest};
use dashmap::DashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

impl UpdateEngine {
    /// Delete every document under `root`, and `root` itself unless
    /// `keep_root`. Returns the number of documents removed.
    pub async fn delete_tree(
        self: Arc<Self>,
        root: &DocUri,
        ctx: &OpContext,
        keep_root: bool,
    ) -> crate::Result<usize> {
        let visited: Arc<DashSet<DocUri>> = Arc::new(DashSet::new());
        let removed = delete_subtree(
            self,
            Arc::new(root.clone()),
            root.clone(),
            ctx.clone(),
            visited,
            keep_root,
        )
        .await?;
        tracing::info!(root = %root, removed, "folder delete complete");
        Ok(removed)
    }
}

/// Recursive step, boxed because the recursion depth follows the tree
fn delete_subtree(
    engine: Arc<UpdateEngine>,
    root: Arc<DocUri>,
    uri: DocUri,
    ctx: OpContext,
    visited: Arc<DashSet<DocUri>>,
    keep_node: bool,
) -> Pin<Box<dyn Future<Output = crate::Result<usize>> + Send>> {
    Box::pin(async move {
        // Which document does this path name right now? A path whose
        // canonical document lives inside the tree is deleted outright;
        // an alias to a document outside the tree only sheds the alias.
        let records = engine
            .gateway()
            .resolve_ids(std::slice::from_ref(&uri))
            .await?;
        let canonical = records
            .get(&uri)
            .and_then(|r| r.current())
            .map(|id| id.uri.clone());
        let target = match canonical {
            Some(c) if c == uri || c == *root || root.is_ancestor_of(&c) => c,
            _ => uri.clone(),
        };
        if !visited.insert(target.clone()) {
            // Another path already reached this document
            return Ok(0);
        }

        let config = engine.gateway().config();
        let page = config.max_get_batch;
        let retries = config.bulk_retry_count;
        let backoff = Duration::from_millis(config.bulk_backoff_ms);

        let mut attempt = 0usize;
        loop {
            // Full child enumeration of this path
            let mut children: Vec<DocUri> = Vec::new();
            let mut token: Option<String> = None;
            loop {
                let (batch, next) = engine.gateway().scan_children(&uri, token, page).await?;
                children.extend(batch);
                match next {
                    Some(t) => token = Some(t),
                    None => break,
                }
            }

            // Parallel sub-trees; plain spawns, so a deep tree never
            // starves itself waiting on its own descendants
            let mut handles = Vec::with_capacity(children.len());
            for child in children {
                handles.push(tokio::spawn(delete_subtree(
                    engine.clone(),
                    root.clone(),
                    child,
                    ctx.clone(),
                    visited.clone(),
                    false,
                )));
            }

            let mut removed = 0usize;
            let mut first_err: Option<crate::Error> = None;
            for handle in handles {
                match handle.await {
                    Ok(Ok(n)) => removed += n,
                    Ok(Err(e)) => {
                        tracing::warn!(node = %uri, "subtree delete failed: {}", e);
                        if first_err.is_none() {
                            first_err = Some(e);
                        }
                    }
                    Err(e) => {
                        if first_err.is_none() {
                            first_err = Some(crate::Error::Internal(format!(
                                "subtree task failed: {}",
                                e
                            )));
                        }
                    }
                }
            }
            if let Some(e) = first_err {
                return Err(e);
            }
            if keep_node {
                return Ok(removed);
            }

            match engine
                .execute(vec![WriteRequest::delete(target.clone())], &ctx)
                .await
            {
                Ok(_) => return Ok(removed + 1),
                // A concurrent delete got here first
                Err(crate::Error::NotFound(_)) => return Ok(removed),
                // New children appeared mid-walk; re-enumerate
                Err(crate::Error::ExistingChildren(_)) if attempt < retries => {
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    })
}
