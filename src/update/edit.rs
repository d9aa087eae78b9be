//! Per-document check-and-edit
//!
//! Step 6 of the write path, run as one parallel task per batch entry:
//! hierarchy and alias-consistency checks against the directory, payload
//! merge and template validation, author/timestamp stamping, and the
//! revision increment. Produces the body and directory writes for the
//! commit steps without performing any of them.

use super::ClassifiedOp;
use crate::common::util::timestamp_now_millis;
use crate::context::OpContext;
use crate::gateway::RequestGateway;
use crate::model::{
    CanonicalId, DocUri, Document, ManifestRecord, UpdateDescriptor, UpdateKind,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Cross-document facts the parallel checks need: what this same batch is
/// inserting, deleting, and which aliases it is dropping
#[derive(Debug, Default)]
pub(crate) struct EditContext {
    pub inserted: HashSet<DocUri>,
    pub deleted: HashSet<DocUri>,
    /// alias -> canonical holder dropping it in this batch
    pub alias_drops: HashMap<DocUri, DocUri>,
}

impl EditContext {
    pub fn build(ops: &[ClassifiedOp], preimages: &HashMap<DocUri, Document>) -> Self {
        let mut ctx = EditContext::default();
        for op in ops {
            match op.kind {
                UpdateKind::Insert => {
                    ctx.inserted.insert(op.uri.clone());
                }
                UpdateKind::Delete => {
                    ctx.deleted.insert(op.uri.clone());
                    if let Some(pre) = preimages.get(&op.uri) {
                        for alias in &pre.aliases {
                            ctx.alias_drops.insert(alias.clone(), op.uri.clone());
                        }
                    }
                }
                UpdateKind::Update => {
                    if let Some(pre) = preimages.get(&op.uri) {
                        for alias in desired_removals(op, pre) {
                            ctx.alias_drops.insert(alias, op.uri.clone());
                        }
                    }
                }
            }
        }
        ctx
    }
}

/// What one document's edit produces: the descriptor for fan-out, the body
/// write or delete, and the directory records
#[derive(Debug)]
pub(crate) struct EditOutcome {
    pub descriptor: UpdateDescriptor,
    pub body_put: Option<Document>,
    pub body_delete: Option<DocUri>,
    pub records: Vec<(DocUri, ManifestRecord)>,
}

/// The alias set an Update ends up with
///
/// Empty requested aliases mean "keep the previous set"; an alias-removal
/// rewrite drops exactly the alias the delete arrived through.
fn desired_aliases(op: &ClassifiedOp, pre: &Document) -> Vec<DocUri> {
    if let Some(dropped) = &op.drop_alias {
        return pre.aliases.iter().filter(|a| *a != dropped).cloned().collect();
    }
    if op.aliases.is_empty() {
        pre.aliases.clone()
    } else {
        op.aliases.clone()
    }
}

fn desired_removals(op: &ClassifiedOp, pre: &Document) -> Vec<DocUri> {
    let desired = desired_aliases(op, pre);
    pre.aliases
        .iter()
        .filter(|a| !desired.contains(a))
        .cloned()
        .collect()
}

/// Shallow field merge: caller fields override, absent fields survive.
/// Non-object payloads on either side replace wholesale.
fn shallow_merge(pre: &serde_json::Value, patch: &serde_json::Value) -> serde_json::Value {
    match (pre.as_object(), patch.as_object()) {
        (Some(base), Some(overlay)) => {
            let mut merged = base.clone();
            for (k, v) in overlay {
                merged.insert(k.clone(), v.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => patch.clone(),
    }
}

/// A document's template may not change across an Update
fn check_template(pre: &serde_json::Value, merged: &serde_json::Value) -> crate::Result<()> {
    if let (Some(old), Some(new)) = (pre.get("template"), merged.get("template")) {
        if old != new {
            return Err(crate::Error::InvalidQuery(format!(
                "template may not change on update: {} -> {}",
                old, new
            )));
        }
    }
    Ok(())
}

/// Cache-aware single-uri directory resolve
async fn resolve_current(
    uri: &DocUri,
    gateway: &RequestGateway,
    ctx: &OpContext,
) -> crate::Result<Option<CanonicalId>> {
    if let Some(cached) = ctx.cache.get_record(uri) {
        return Ok(cached.and_then(|r| r.current().cloned()));
    }
    let records = gateway.resolve_ids(std::slice::from_ref(uri)).await?;
    let record = records.get(uri).cloned();
    ctx.cache.put_record(uri, record.clone());
    Ok(record.and_then(|r| r.current().cloned()))
}

/// Insert/alias-add requires the immediate parent to exist, either in the
/// directory or earlier in this same batch
async fn check_parent(
    uri: &DocUri,
    gateway: &RequestGateway,
    edit_ctx: &EditContext,
    ctx: &OpContext,
) -> crate::Result<()> {
    let parent = match uri.parent() {
        Some(p) if !p.is_root() => p,
        _ => return Ok(()),
    };
    if edit_ctx.inserted.contains(&parent) {
        return Ok(());
    }
    if resolve_current(&parent, gateway, ctx).await?.is_some() {
        return Ok(());
    }
    Err(crate::Error::MissingParent(uri.as_str().to_string()))
}

/// An added alias may not currently resolve to a different document, unless
/// that holder drops the alias (or is deleted) in this same batch
async fn check_alias_free(
    alias: &DocUri,
    target: &DocUri,
    gateway: &RequestGateway,
    edit_ctx: &EditContext,
    ctx: &OpContext,
) -> crate::Result<()> {
    if alias == target {
        return Err(crate::Error::InvalidUri(format!(
            "alias equals canonical uri: {}",
            alias
        )));
    }
    if let Some(holder) = resolve_current(alias, gateway, ctx).await? {
        if holder.uri != *target
            && edit_ctx.alias_drops.get(alias) != Some(&holder.uri)
            && !edit_ctx.deleted.contains(&holder.uri)
        {
            return Err(crate::Error::AliasCollision {
                alias: alias.as_str().to_string(),
                holder: holder.uri.as_str().to_string(),
            });
        }
    }
    Ok(())
}

/// Delete/alias-remove requires the removed path to have no child documents
async fn check_no_children(path: &DocUri, gateway: &RequestGateway) -> crate::Result<()> {
    let (children, _) = gateway.scan_children(path, None, 1).await?;
    if children.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::ExistingChildren(path.as_str().to_string()))
    }
}

pub(crate) async fn check_and_edit(
    op: ClassifiedOp,
    pre: Option<Document>,
    gateway: Arc<RequestGateway>,
    edit_ctx: Arc<EditContext>,
    ctx: OpContext,
) -> crate::Result<EditOutcome> {
    match op.kind {
        UpdateKind::Insert => {
            let payload = op
                .payload
                .clone()
                .ok_or_else(|| crate::Error::Internal("insert without payload".into()))?;
            check_parent(&op.uri, &gateway, &edit_ctx, &ctx).await?;
            for alias in &op.aliases {
                check_parent(alias, &gateway, &edit_ctx, &ctx).await?;
                check_alias_free(alias, &op.uri, &gateway, &edit_ctx, &ctx).await?;
            }

            let now = timestamp_now_millis();
            let doc = Document {
                uri: op.uri.clone(),
                revision: 1,
                aliases: op.aliases.clone(),
                payload,
                author: ctx.identity.principal.clone(),
                created_at: now,
                updated_at: now,
            };
            let id = doc.canonical_id();
            let records = doc
                .all_uris()
                .into_iter()
                .map(|u| (u, ManifestRecord::Current(id.clone())))
                .collect();
            Ok(EditOutcome {
                descriptor: UpdateDescriptor::insert(doc.clone()),
                body_put: Some(doc),
                body_delete: None,
                records,
            })
        }

        UpdateKind::Update => {
            let pre =
                pre.ok_or_else(|| crate::Error::NotFound(op.uri.as_str().to_string()))?;
            let payload = match &op.payload {
                Some(patch) => {
                    let merged = shallow_merge(&pre.payload, patch);
                    check_template(&pre.payload, &merged)?;
                    merged
                }
                // Alias-removal rewrite: body fields untouched
                None => pre.payload.clone(),
            };

            let desired = desired_aliases(&op, &pre);
            let removals = desired_removals(&op, &pre);
            for alias in &desired {
                if !pre.aliases.contains(alias) {
                    check_parent(alias, &gateway, &edit_ctx, &ctx).await?;
                    check_alias_free(alias, &op.uri, &gateway, &edit_ctx, &ctx).await?;
                }
            }
            for removed in &removals {
                check_no_children(removed, &gateway).await?;
            }

            let doc = Document {
                uri: op.uri.clone(),
                revision: pre.revision + 1,
                aliases: desired,
                payload,
                author: ctx.identity.principal.clone(),
                created_at: pre.created_at,
                updated_at: timestamp_now_millis(),
            };
            let id = doc.canonical_id();
            let mut records: Vec<(DocUri, ManifestRecord)> = doc
                .all_uris()
                .into_iter()
                .map(|u| (u, ManifestRecord::Current(id.clone())))
                .collect();
            for removed in removals {
                records.push((removed, ManifestRecord::Tombstone));
            }
            Ok(EditOutcome {
                descriptor: UpdateDescriptor::update(pre, doc.clone()),
                body_put: Some(doc),
                body_delete: None,
                records,
            })
        }

        UpdateKind::Delete => {
            let pre =
                pre.ok_or_else(|| crate::Error::NotFound(op.uri.as_str().to_string()))?;
            for path in pre.all_uris() {
                check_no_children(&path, &gateway).await?;
            }
            let records = pre
                .all_uris()
                .into_iter()
                .map(|u| (u, ManifestRecord::Tombstone))
                .collect();
            Ok(EditOutcome {
                descriptor: UpdateDescriptor::delete(pre.clone()),
                body_put: None,
                body_delete: Some(pre.uri),
                records,
            })
        }
    }
}
