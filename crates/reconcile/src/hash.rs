//! Content hashing for duplicate detection.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use concilio_core::Money;

/// Dedup hash of a bank record: SHA-256 over the fields banks keep stable
/// across exports, hex-encoded. Counterparty and communication are folded
/// through [`crate::similarity::normalize`] so cosmetic re-export
/// differences do not defeat duplicate detection.
pub fn record_fingerprint(
    account_number: &str,
    execution_date: NaiveDate,
    amount: Money,
    counterparty_name: &str,
    communication: &str,
) -> String {
    let canonical = format!(
        "{}|{}|{}|{}|{}",
        account_number.trim(),
        execution_date,
        amount.to_cents(),
        crate::similarity::normalize(counterparty_name),
        crate::similarity::normalize(communication),
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derived hash for a split child. Children are never deduplicated against
/// imports; this only keeps the hash column distinct per child.
pub fn child_fingerprint(parent_hash: &str, child_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent_hash.as_bytes());
    hasher.update(child_index.to_le_bytes());
    hex::encode(hasher.finalize())
}
