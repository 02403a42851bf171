//! Applies a split plan to the ledger. The plan's commands form one
//! logical unit; there is no cross-statement rollback, so a mid-sequence
//! failure is reported with exactly how far the plan got.

use serde::Serialize;

use concilio_core::{LedgerCommand, ReconcileError, TransactionId};
use concilio_reconcile::SplitPlan;

use crate::db::{self, DbPool};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SplitCommit {
    pub created: Vec<TransactionId>,
    pub deleted: Vec<TransactionId>,
}

pub async fn commit_split(pool: &DbPool, plan: &SplitPlan) -> Result<SplitCommit, ReconcileError> {
    let total = plan.commands.len();
    let mut commit = SplitCommit::default();

    for (applied, command) in plan.commands.iter().enumerate() {
        let result = match command {
            LedgerCommand::CreateChild(draft) => match db::insert_child(pool, draft).await {
                Ok(id) => {
                    commit.created.push(id);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            LedgerCommand::Delete(id) => match db::delete_transaction(pool, *id).await {
                Ok(()) => {
                    commit.deleted.push(*id);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            LedgerCommand::SetSplitFlags {
                id,
                is_parent,
                child_count,
            } => db::set_split_flags(pool, *id, *is_parent, *child_count).await,
        };

        if let Err(e) = result {
            tracing::error!(
                parent = %plan.parent,
                applied,
                total,
                error = %e,
                "split plan failed mid-sequence"
            );
            return Err(ReconcileError::PartialSplitFailure {
                applied,
                total,
                message: e.to_string(),
            });
        }
    }

    Ok(commit)
}
