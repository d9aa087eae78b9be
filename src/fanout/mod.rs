//! Post-commit fan-out implementations
//!
//! The update engine hands each committed batch's descriptors to a
//! [`FanoutSink`] exactly once, after the directory write. What happens
//! next (search indexing, webhooks, notification queues) is downstream
//! territory; this module only ships the boundary's stock implementations.

pub use crate::backend::FanoutSink;

use crate::context::Identity;
use crate::model::UpdateDescriptor;
use async_trait::async_trait;

/// Sink that drops every submission. The default for clients that have no
/// post-commit consumers.
pub struct NullFanout;

#[async_trait]
impl FanoutSink for NullFanout {
    async fn submit(
        &self,
        _descriptors: Vec<UpdateDescriptor>,
        _identity: &Identity,
    ) -> crate::Result<()> {
        Ok(())
    }
}

/// Sink that logs a summary line per submission
pub struct LoggingFanout;

#[async_trait]
impl FanoutSink for LoggingFanout {
    async fn submit(
        &self,
        descriptors: Vec<UpdateDescriptor>,
        identity: &Identity,
    ) -> crate::Result<()> {
        for d in &descriptors {
            tracing::info!(
                principal = %identity.principal,
                uri = %d.uri,
                kind = ?d.kind,
                "post-commit"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocUri, Document};
    use serde_json::json;

    #[tokio::test]
    async fn test_null_fanout_accepts_everything() {
        let doc = Document {
            uri: DocUri::parse("/a").unwrap(),
            revision: 1,
            aliases: vec![],
            payload: json!({}),
            author: "t".into(),
            created_at: 0,
            updated_at: 0,
        };
        NullFanout
            .submit(vec![UpdateDescriptor::insert(doc)], &Identity::system())
            .await
            .unwrap();
    }
}
