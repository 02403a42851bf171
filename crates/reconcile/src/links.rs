//! The many-to-many relation between transactions and candidate entities.
//!
//! Reconciliation state is derivable from the link set: any link forces
//! `reconciled`; removing the last link falls back to `unverified`. The
//! manual three-state cycle only exists for transactions without links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use concilio_core::{
    CandidateEntity, EntityKind, EntityLink, LinkOrigin, ReconcileError, ReconciliationStatus,
    TransactionRecord,
};

/// Instruction for the caller after an unlink; the registry never touches
/// external entities itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SideEffect {
    /// The expense claim was marked reimbursed when it was linked; the
    /// caller must set it back to approved.
    RevertExpenseClaim { claim_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unlinked {
    pub removed: EntityLink,
    pub side_effect: Option<SideEffect>,
}

/// Build a link for a scored candidate. Pure; nothing is mutated until
/// [`accept_link`].
pub fn propose_link(
    cand: &CandidateEntity,
    confidence: u8,
    matched_by: LinkOrigin,
    at: DateTime<Utc>,
) -> EntityLink {
    EntityLink {
        entity_kind: cand.kind(),
        entity_id: cand.id().to_string(),
        entity_name: cand.display_name().to_string(),
        confidence,
        matched_at: at,
        matched_by,
    }
}

/// Append a link and mark the transaction reconciled. At most one link per
/// `(kind, entity id)` pair; a parent with live children cannot be linked.
pub fn accept_link(tx: &mut TransactionRecord, link: EntityLink) -> Result<(), ReconcileError> {
    if tx.is_parent && tx.child_count > 0 {
        return Err(ReconcileError::InvalidSplitTarget(
            "parent transaction delegates its balance to its children".to_string(),
        ));
    }
    if tx.has_link(link.entity_kind, &link.entity_id) {
        return Err(ReconcileError::DuplicateLink {
            kind: link.entity_kind,
            entity_id: link.entity_id,
        });
    }

    tx.links.push(link);
    tx.status = ReconciliationStatus::Reconciled;
    tx.is_reconciled = tx.derive_reconciled();
    Ok(())
}

/// Remove the link for an entity. When the last link goes, the status
/// reverts to `unverified`, never silently back to `reconciled`. Removing
/// an expense link yields the status-rollback instruction for the caller.
pub fn remove_link(
    tx: &mut TransactionRecord,
    kind: EntityKind,
    entity_id: &str,
) -> Result<Unlinked, ReconcileError> {
    let pos = tx
        .links
        .iter()
        .position(|l| l.entity_kind == kind && l.entity_id == entity_id)
        .ok_or_else(|| ReconcileError::LinkNotFound {
            entity_id: entity_id.to_string(),
        })?;

    let removed = tx.links.remove(pos);
    if tx.links.is_empty() {
        tx.status = ReconciliationStatus::Unverified;
    }
    tx.is_reconciled = tx.derive_reconciled();

    let side_effect = match removed.entity_kind {
        EntityKind::Expense => Some(SideEffect::RevertExpenseClaim {
            claim_id: removed.entity_id.clone(),
        }),
        _ => None,
    };

    Ok(Unlinked { removed, side_effect })
}

/// Advance the manual status cycle. Only legal while the transaction has
/// no links; linked transactions always read as reconciled.
pub fn cycle_status(tx: &mut TransactionRecord) -> Result<ReconciliationStatus, ReconcileError> {
    if !tx.links.is_empty() {
        return Err(ReconcileError::StatusLocked);
    }
    tx.status = tx.status.next();
    tx.is_reconciled = tx.derive_reconciled();
    Ok(tx.status)
}
