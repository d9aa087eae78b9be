//! Filter condition trees for range queries
//!
//! A [`Filter`] is an OR of AND-clauses: `vec![vec![c1, c2], vec![c3]]`
//! matches documents satisfying (c1 AND c2) OR c3. Clauses are scanned in
//! order; the cursor records which clause a paginated query is in.

use crate::common::ClientConfig;
use crate::model::document::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// URL-forward-match: string prefix, typically on the `uri` field
    Prefix,
    /// Full-text containment, served by the full-text index
    FullText,
}

/// One predicate on a document field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOp,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: ConditionOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, ConditionOp::Eq, value)
    }

    pub fn prefix(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, ConditionOp::Prefix, Value::String(value.into()))
    }

    pub fn full_text(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, ConditionOp::FullText, Value::String(value.into()))
    }

    /// Evaluate this predicate against a document, in memory
    pub fn matches(&self, doc: &Document) -> bool {
        let actual = match doc.field(&self.field) {
            Some(v) => v,
            None => return false,
        };
        match self.op {
            ConditionOp::Eq => actual == self.value,
            ConditionOp::Ne => actual != self.value,
            ConditionOp::Lt => compare(&actual, &self.value).map_or(false, |o| o.is_lt()),
            ConditionOp::Le => compare(&actual, &self.value).map_or(false, |o| o.is_le()),
            ConditionOp::Gt => compare(&actual, &self.value).map_or(false, |o| o.is_gt()),
            ConditionOp::Ge => compare(&actual, &self.value).map_or(false, |o| o.is_ge()),
            ConditionOp::Prefix => match (actual.as_str(), self.value.as_str()) {
                (Some(a), Some(p)) => a.starts_with(p),
                _ => false,
            },
            ConditionOp::FullText => match (actual.as_str(), self.value.as_str()) {
                (Some(a), Some(needle)) => {
                    a.to_lowercase().contains(&needle.to_lowercase())
                }
                _ => false,
            },
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().and_then(|x| y.as_f64().map(|y| (x, y)))
                .and_then(|(x, y)| x.partial_cmp(&y))
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// An OR of AND-clauses
pub type Filter = Vec<Vec<Condition>>;

/// Does the whole clause (AND) match the document?
pub fn clause_matches(clause: &[Condition], doc: &Document) -> bool {
    clause.iter().all(|c| c.matches(doc))
}

/// Validate a filter before any backend call
///
/// Rejected combinations:
/// - an empty filter or an empty clause
/// - `Prefix` (URL-forward-match) combined with `FullText` in one clause
/// - a `FullText` clause against a partitioned full-text index without an
///   equality predicate on the configured partition key
pub fn validate_filter(filter: &Filter, config: &ClientConfig) -> crate::Result<()> {
    if filter.is_empty() {
        return Err(crate::Error::InvalidQuery("empty filter".into()));
    }
    for (idx, clause) in filter.iter().enumerate() {
        if clause.is_empty() {
            return Err(crate::Error::InvalidQuery(format!(
                "empty clause at index {}",
                idx
            )));
        }
        let has_full_text = clause.iter().any(|c| c.op == ConditionOp::FullText);
        let has_prefix = clause.iter().any(|c| c.op == ConditionOp::Prefix);
        if has_full_text && has_prefix {
            return Err(crate::Error::InvalidQuery(format!(
                "clause {} combines URL-forward-match with full-text",
                idx
            )));
        }
        if has_full_text && config.fulltext_partitioned {
            let has_partition_eq = clause.iter().any(|c| {
                c.op == ConditionOp::Eq && c.field == config.fulltext_partition_key
            });
            if !has_partition_eq {
                return Err(crate::Error::InvalidQuery(format!(
                    "clause {} needs an equality predicate on partition key '{}'",
                    idx, config.fulltext_partition_key
                )));
            }
        }
    }
    Ok(())
}
