//! Per-clause scan planning
//!
//! For each OR-clause, pick the index that will serve the id scan and split
//! the clause into the "edited condition" (predicates the chosen index can
//! satisfy) and the residual predicates evaluated in memory after the body
//! fetch.

use crate::backend::{EditedClause, ScanStrategy};
use crate::common::ClientConfig;
use crate::model::{Condition, ConditionOp, DocUri};

/// The plan for one OR-clause
#[derive(Debug, Clone)]
pub struct ClausePlan {
    pub edited: EditedClause,
    pub residual: Vec<Condition>,
}

/// Choose a strategy and split the clause
///
/// Priority: full-text predicates force the full-text index; otherwise an
/// equality predicate on an indexed field selects the secondary index;
/// otherwise the clause falls back to a directory walk of the scope (with
/// any URL-forward-match pushed down).
pub fn plan_clause(clause: &[Condition], scope: &DocUri, config: &ClientConfig) -> ClausePlan {
    let has_full_text = clause.iter().any(|c| c.op == ConditionOp::FullText);
    if has_full_text {
        let (pushed, residual): (Vec<Condition>, Vec<Condition>) =
            clause.iter().cloned().partition(|c| {
                c.op == ConditionOp::FullText
                    || (c.op == ConditionOp::Eq && c.field == config.fulltext_partition_key)
            });
        return ClausePlan {
            edited: EditedClause {
                strategy: ScanStrategy::FullText,
                scope: scope.clone(),
                conditions: pushed,
            },
            residual,
        };
    }

    let has_indexed_eq = clause
        .iter()
        .any(|c| c.op == ConditionOp::Eq && config.indexed_fields.contains(&c.field));
    if has_indexed_eq {
        let (pushed, residual): (Vec<Condition>, Vec<Condition>) =
            clause.iter().cloned().partition(|c| {
                c.op == ConditionOp::Eq && config.indexed_fields.contains(&c.field)
            });
        return ClausePlan {
            edited: EditedClause {
                strategy: ScanStrategy::Secondary,
                scope: scope.clone(),
                conditions: pushed,
            },
            residual,
        };
    }

    let (pushed, residual): (Vec<Condition>, Vec<Condition>) = clause
        .iter()
        .cloned()
        .partition(|c| c.op == ConditionOp::Prefix && c.field == "uri");
    ClausePlan {
        edited: EditedClause {
            strategy: ScanStrategy::DirectoryWalk,
            scope: scope.clone(),
            conditions: pushed,
        },
        residual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> DocUri {
        DocUri::parse("/docs").unwrap()
    }

    #[test]
    fn test_full_text_wins_and_keeps_partition_eq() {
        let config = ClientConfig::default();
        let clause = vec![
            Condition::full_text("body", "needle"),
            Condition::eq("owner", json!("acme")),
            Condition::eq("other", json!(1)),
        ];
        let plan = plan_clause(&clause, &scope(), &config);
        assert_eq!(plan.edited.strategy, ScanStrategy::FullText);
        assert_eq!(plan.edited.conditions.len(), 2);
        assert_eq!(plan.residual.len(), 1);
        assert_eq!(plan.residual[0].field, "other");
    }

    #[test]
    fn test_indexed_eq_selects_secondary() {
        let config = ClientConfig::default();
        let clause = vec![
            Condition::eq("kind", json!("note")),
            Condition::new("size", ConditionOp::Gt, json!(10)),
        ];
        let plan = plan_clause(&clause, &scope(), &config);
        assert_eq!(plan.edited.strategy, ScanStrategy::Secondary);
        assert_eq!(plan.edited.conditions.len(), 1);
        assert_eq!(plan.edited.conditions[0].field, "kind");
        assert_eq!(plan.residual.len(), 1);
    }

    #[test]
    fn test_unindexed_falls_back_to_directory_walk() {
        let config = ClientConfig::default();
        let clause = vec![Condition::new("size", ConditionOp::Gt, json!(10))];
        let plan = plan_clause(&clause, &scope(), &config);
        assert_eq!(plan.edited.strategy, ScanStrategy::DirectoryWalk);
        assert!(plan.edited.conditions.is_empty());
        assert_eq!(plan.residual.len(), 1);
    }

    #[test]
    fn test_uri_prefix_pushed_into_directory_walk() {
        let config = ClientConfig::default();
        let clause = vec![
            Condition::prefix("uri", "/docs/2024/"),
            Condition::new("size", ConditionOp::Gt, json!(10)),
        ];
        let plan = plan_clause(&clause, &scope(), &config);
        assert_eq!(plan.edited.strategy, ScanStrategy::DirectoryWalk);
        assert_eq!(plan.edited.conditions.len(), 1);
        assert_eq!(plan.edited.conditions[0].op, ConditionOp::Prefix);
        assert_eq!(plan.residual.len(), 1);
    }
}
