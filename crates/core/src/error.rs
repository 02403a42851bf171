use thiserror::Error;

use super::money::Money;
use super::record::{EntityKind, TransactionId};

/// A single violated constraint found while validating a split plan.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum SplitViolation {
    #[error("line {line} has an empty description")]
    EmptyDescription { line: usize },
    #[error("line {line} must have an amount greater than zero")]
    NonPositiveAmount { line: usize },
    #[error("line amounts sum to {actual}, expected {expected}")]
    SumMismatch { expected: Money, actual: Money },
}

#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error("transaction already linked to {kind} {entity_id}")]
    DuplicateLink { kind: EntityKind, entity_id: String },
    #[error("no link to entity {entity_id} on this transaction")]
    LinkNotFound { entity_id: String },
    #[error("manual status cycle is disabled while links exist")]
    StatusLocked,
    #[error("merge would discard reconciled children {0:?}; confirmation required")]
    UnsafeMergeRejected(Vec<TransactionId>),
    #[error("invalid split target: {0}")]
    InvalidSplitTarget(String),
    #[error("split validation failed: {}", format_violations(.0))]
    SplitValidationFailed(Vec<SplitViolation>),
    #[error("split partially applied: {applied} of {total} commands succeeded ({message})")]
    PartialSplitFailure {
        applied: usize,
        total: usize,
        message: String,
    },
    #[error("persistence error: {0}")]
    Persistence(String),
}

fn format_violations(violations: &[SplitViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
