//! Split/merge state machine.
//!
//! A transaction is `standalone`, a `parent` (two or more children) or a
//! `child`. The engine turns a requested child set into an ordered command
//! plan; the ledger applies the plan as one unit. Children own the money:
//! a parent's own balance is inert until its children are merged back.

use concilio_core::{
    ChildDraft, LedgerCommand, Money, ReconcileError, SplitLine, SplitViolation, TransactionId,
    TransactionRecord,
};

use crate::hash;

#[derive(Debug, Clone, PartialEq)]
pub struct SplitPlan {
    pub parent: TransactionId,
    pub commands: Vec<LedgerCommand>,
}

impl SplitPlan {
    pub fn is_noop(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Check a committed line set against the parent magnitude. Returns every
/// violated constraint, not just the first.
pub fn validate_lines(target: Money, lines: &[SplitLine]) -> Result<(), ReconcileError> {
    let mut violations = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        if line.description.trim().is_empty() {
            violations.push(SplitViolation::EmptyDescription { line: index });
        }
        if line.amount.to_cents() <= 0 {
            violations.push(SplitViolation::NonPositiveAmount { line: index });
        }
    }

    let sum = lines
        .iter()
        .fold(Money::zero(), |acc, line| acc + line.amount.abs());
    if !sum.within_cent(target.abs()) {
        violations.push(SplitViolation::SumMismatch {
            expected: target.abs(),
            actual: sum,
        });
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::SplitValidationFailed(violations))
    }
}

/// Plan a (re-)split of `parent` into `lines`, replacing `children`.
///
/// Fewer than two lines means revert: all children are deleted and the
/// parent becomes standalone again. Deleting a child that is linked or
/// reconciled loses its history, so that needs `confirm_discard`.
pub fn plan_split(
    parent: &TransactionRecord,
    children: &[TransactionRecord],
    lines: &[SplitLine],
    confirm_discard: bool,
) -> Result<SplitPlan, ReconcileError> {
    ensure_splittable(parent)?;

    if lines.len() < 2 {
        return plan_merge(parent, children, confirm_discard);
    }

    validate_lines(parent.amount, lines)?;
    guard_discard(children, confirm_discard)?;

    let mut commands: Vec<LedgerCommand> =
        children.iter().map(|c| LedgerCommand::Delete(c.id)).collect();
    let total = lines.len() as u32;
    for (index, line) in lines.iter().enumerate() {
        commands.push(LedgerCommand::CreateChild(child_draft(
            parent,
            line,
            index as u32 + 1,
            total,
        )));
    }
    commands.push(LedgerCommand::SetSplitFlags {
        id: parent.id,
        is_parent: true,
        child_count: total,
    });

    Ok(SplitPlan { parent: parent.id, commands })
}

/// Plan reverting a parent to standalone, deleting all children.
pub fn plan_merge(
    parent: &TransactionRecord,
    children: &[TransactionRecord],
    confirm_discard: bool,
) -> Result<SplitPlan, ReconcileError> {
    ensure_splittable(parent)?;

    if !parent.is_parent && children.is_empty() {
        // Nothing to revert; committing 0 or 1 lines on a standalone
        // transaction leaves it untouched.
        return Ok(SplitPlan { parent: parent.id, commands: Vec::new() });
    }

    guard_discard(children, confirm_discard)?;

    let mut commands: Vec<LedgerCommand> =
        children.iter().map(|c| LedgerCommand::Delete(c.id)).collect();
    commands.push(LedgerCommand::SetSplitFlags {
        id: parent.id,
        is_parent: false,
        child_count: 0,
    });

    Ok(SplitPlan { parent: parent.id, commands })
}

/// Plan removal of a single child line. Dropping below two children
/// cascades into a full merge back to standalone.
pub fn plan_remove_child(
    parent: &TransactionRecord,
    children: &[TransactionRecord],
    child_id: TransactionId,
    confirm_discard: bool,
) -> Result<SplitPlan, ReconcileError> {
    ensure_splittable(parent)?;

    let removed = children
        .iter()
        .find(|c| c.id == child_id)
        .ok_or_else(|| {
            ReconcileError::InvalidSplitTarget(format!(
                "transaction {child_id} is not a child of {}",
                parent.id
            ))
        })?;

    let remaining = children.len() - 1;
    if remaining < 2 {
        return plan_merge(parent, children, confirm_discard);
    }

    guard_discard(std::slice::from_ref(removed), confirm_discard)?;

    Ok(SplitPlan {
        parent: parent.id,
        commands: vec![
            LedgerCommand::Delete(removed.id),
            LedgerCommand::SetSplitFlags {
                id: parent.id,
                is_parent: true,
                child_count: remaining as u32,
            },
        ],
    })
}

fn ensure_splittable(parent: &TransactionRecord) -> Result<(), ReconcileError> {
    if parent.is_child() {
        return Err(ReconcileError::InvalidSplitTarget(
            "a split child cannot be split further".to_string(),
        ));
    }
    if !parent.is_parent && !parent.links.is_empty() {
        return Err(ReconcileError::InvalidSplitTarget(
            "transaction is linked to an entity; unlink it before splitting".to_string(),
        ));
    }
    Ok(())
}

fn guard_discard(
    children: &[TransactionRecord],
    confirm_discard: bool,
) -> Result<(), ReconcileError> {
    let protected: Vec<TransactionId> = children
        .iter()
        .filter(|c| !c.links.is_empty() || c.derive_reconciled())
        .map(|c| c.id)
        .collect();
    if !protected.is_empty() && !confirm_discard {
        return Err(ReconcileError::UnsafeMergeRejected(protected));
    }
    Ok(())
}

fn child_draft(
    parent: &TransactionRecord,
    line: &SplitLine,
    index: u32,
    total: u32,
) -> ChildDraft {
    let signed_amount = if parent.amount.is_negative() {
        -line.amount.abs()
    } else {
        line.amount.abs()
    };

    let mut pieces: Vec<&str> = Vec::new();
    let parent_comm = parent.communication.trim();
    if !parent_comm.is_empty() {
        pieces.push(parent_comm);
    }
    pieces.push(line.description.trim());
    if let Some(notes) = line.notes.as_deref() {
        if !notes.trim().is_empty() {
            pieces.push(notes.trim());
        }
    }
    let communication = format!("{} ({index}/{total})", pieces.join(" | "));

    let sequence_number = if parent.sequence_number.trim().is_empty() {
        String::new()
    } else {
        format!("{}.{index}", parent.sequence_number.trim())
    };

    ChildDraft {
        parent_id: parent.id,
        child_index: index,
        sequence_number,
        dedup_hash: hash::child_fingerprint(&parent.dedup_hash, index),
        execution_date: parent.execution_date,
        value_date: parent.value_date,
        amount: signed_amount,
        counterparty_name: parent.counterparty_name.clone(),
        counterparty_iban: parent.counterparty_iban.clone(),
        communication,
        account_number: parent.account_number.clone(),
        category_id: line.category_id.clone().or_else(|| parent.category_id.clone()),
        account_code: line.account_code.clone().or_else(|| parent.account_code.clone()),
    }
}
