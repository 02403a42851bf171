//! Applies the import resolver's dispositions to the ledger, one record at
//! a time. A write failure on one record is counted and logged; the rest of
//! the batch still goes through.

use concilio_reconcile::{Disposition, ImportResolver, ImportSummary, IncomingRecord};

use crate::db::{self, DbPool};

pub async fn import_batch(
    pool: &DbPool,
    records: &[IncomingRecord],
) -> Result<ImportSummary, sqlx::Error> {
    let ledger = db::fetch_all_transactions(pool).await?;
    let mut resolver = ImportResolver::from_ledger(&ledger);
    let mut summary = ImportSummary::default();

    for record in records {
        let disposition = resolver.resolve(record);

        let applied = match &disposition {
            Disposition::New => db::insert_imported(pool, record).await.map(Some),
            Disposition::Duplicate { .. } => Ok(None),
            Disposition::SequenceCompleted { existing } => db::complete_sequence(
                pool,
                *existing,
                record.sequence_number.trim(),
                &record.fingerprint(),
            )
            .await
            .map(|()| None),
            Disposition::Enriched { existing, patch } => {
                db::apply_enrichment(pool, *existing, patch).await.map(|()| None)
            }
        };

        match applied {
            Ok(new_id) => {
                resolver.admit(record, &disposition, new_id);
                summary.tally(&disposition);
            }
            Err(e) => {
                tracing::warn!(
                    sequence = %record.sequence_number,
                    error = %e,
                    "failed to persist import disposition; continuing batch"
                );
                summary.errors += 1;
            }
        }
    }

    Ok(summary)
}
