//! Import-time dedup and enrichment.
//!
//! The resolver classifies each incoming bank record against an in-memory
//! index of the ledger. It performs no I/O: the caller persists the
//! disposition, then admits it so later records in the same batch see the
//! updated index. Batch order is therefore significant and preserved.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use concilio_core::{Money, TransactionId, TransactionRecord};

use crate::hash;
use crate::similarity;

/// A bank sequence number the ledger considers unfinished: a year prefix
/// with no trailing digits, e.g. `2025-`.
pub fn is_incomplete_sequence(seq: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\d{4}-$").expect("static pattern"))
        .is_match(seq.trim())
}

/// Days of slack when checking an incoming record against an entry with an
/// incomplete sequence number.
const DATE_SLACK_DAYS: i64 = 3;
/// Similarity floor for counterparty/memo agreement in the same check.
const NAME_FLOOR: f32 = 0.85;

/// One raw record from a bank export, as handed over by the (external)
/// file parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingRecord {
    pub sequence_number: String,
    pub execution_date: NaiveDate,
    pub value_date: NaiveDate,
    pub amount: Money,
    #[serde(default)]
    pub counterparty_name: String,
    #[serde(default)]
    pub counterparty_iban: String,
    #[serde(default)]
    pub communication: String,
    pub account_number: String,
}

impl IncomingRecord {
    pub fn fingerprint(&self) -> String {
        hash::record_fingerprint(
            &self.account_number,
            self.execution_date,
            self.amount,
            &self.counterparty_name,
            &self.communication,
        )
    }
}

/// Fields to fill on an existing entry. Only blank fields are ever patched;
/// a non-empty value is never overwritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentPatch {
    pub counterparty_name: Option<String>,
    pub counterparty_iban: Option<String>,
    pub communication: Option<String>,
}

impl EnrichmentPatch {
    pub fn is_empty(&self) -> bool {
        self.counterparty_name.is_none()
            && self.counterparty_iban.is_none()
            && self.communication.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "camelCase")]
pub enum Disposition {
    /// No existing entry accounts for this record; insert it.
    New,
    /// The record is already in the ledger; discard.
    Duplicate { existing: TransactionId },
    /// An entry with an incomplete sequence number matches this record;
    /// adopt the incoming sequence number and hash in place.
    SequenceCompleted { existing: TransactionId },
    /// An existing sparse entry gains the incoming record's fields.
    Enriched {
        existing: TransactionId,
        patch: EnrichmentPatch,
    },
}

/// Batch outcome counts, in import order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub new: u32,
    pub completed: u32,
    pub enriched: u32,
    pub duplicates: u32,
    pub errors: u32,
}

impl ImportSummary {
    pub fn tally(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::New => self.new += 1,
            Disposition::Duplicate { .. } => self.duplicates += 1,
            Disposition::SequenceCompleted { .. } => self.completed += 1,
            Disposition::Enriched { .. } => self.enriched += 1,
        }
    }
}

/// Which optional fields an indexed entry already carries.
#[derive(Debug, Clone, Copy)]
struct FieldPresence {
    counterparty: bool,
    iban: bool,
    communication: bool,
}

/// Index entry for a ledger record with an incomplete sequence number.
/// Carries the fields needed for the tolerance check.
#[derive(Debug, Clone)]
struct IncompleteEntry {
    id: TransactionId,
    sequence_number: String,
    dedup_hash: String,
    execution_date: NaiveDate,
    amount: Money,
    counterparty_name: String,
    communication: String,
}

impl IncompleteEntry {
    fn tolerates(&self, incoming: &IncomingRecord) -> bool {
        let days = (incoming.execution_date - self.execution_date).num_days().abs();
        if days > DATE_SLACK_DAYS {
            return false;
        }
        if incoming.amount.to_cents() != self.amount.to_cents() {
            return false;
        }

        let name_ok = self.counterparty_name.trim().is_empty()
            || similarity::name_similarity(&self.counterparty_name, &incoming.counterparty_name)
                >= NAME_FLOOR;
        let memo_ok = self.communication.trim().is_empty()
            || incoming.communication.trim().is_empty()
            || similarity::keyword_overlap(&self.communication, &incoming.communication)
            || similarity::name_similarity(&self.communication, &incoming.communication)
                >= NAME_FLOOR;

        name_ok && memo_ok
    }
}

pub struct ImportResolver {
    by_hash: HashMap<String, TransactionId>,
    /// Complete sequence numbers only; incomplete ones live in `incomplete`
    /// (several entries may share the same year prefix).
    by_sequence: HashMap<String, TransactionId>,
    slots: HashMap<TransactionId, FieldPresence>,
    incomplete: Vec<IncompleteEntry>,
}

impl ImportResolver {
    /// Build the lookup index from a ledger snapshot. Split children are
    /// internal records and never take part in import resolution.
    pub fn from_ledger(records: &[TransactionRecord]) -> Self {
        let mut resolver = ImportResolver {
            by_hash: HashMap::new(),
            by_sequence: HashMap::new(),
            slots: HashMap::new(),
            incomplete: Vec::new(),
        };

        for record in records.iter().filter(|r| !r.is_child()) {
            resolver.slots.insert(record.id, FieldPresence {
                counterparty: !record.counterparty_name.trim().is_empty(),
                iban: !record.counterparty_iban.trim().is_empty(),
                communication: !record.communication.trim().is_empty(),
            });

            if !record.dedup_hash.is_empty() {
                resolver.by_hash.insert(record.dedup_hash.clone(), record.id);
            }

            let seq = record.sequence_number.trim();
            if is_incomplete_sequence(seq) {
                resolver.incomplete.push(IncompleteEntry {
                    id: record.id,
                    sequence_number: seq.to_string(),
                    dedup_hash: record.dedup_hash.clone(),
                    execution_date: record.execution_date,
                    amount: record.amount,
                    counterparty_name: record.counterparty_name.clone(),
                    communication: record.communication.clone(),
                });
            } else if !seq.is_empty() {
                resolver.by_sequence.insert(seq.to_string(), record.id);
            }
        }

        resolver
    }

    /// Classify one incoming record. Pure: the index is only extended once
    /// the caller persists the outcome and calls [`ImportResolver::admit`].
    ///
    /// Priority: incomplete-number completion, then enrichment (sequence or
    /// hash), then duplicate, else new.
    pub fn resolve(&self, incoming: &IncomingRecord) -> Disposition {
        let seq = incoming.sequence_number.trim();
        let seq_is_complete = !seq.is_empty() && !is_incomplete_sequence(seq);

        if seq_is_complete {
            for entry in &self.incomplete {
                if seq.starts_with(entry.sequence_number.as_str()) && entry.tolerates(incoming) {
                    return Disposition::SequenceCompleted { existing: entry.id };
                }
            }
        }

        if !incoming.counterparty_name.trim().is_empty() {
            let by_seq = if seq_is_complete {
                self.by_sequence.get(seq).copied()
            } else {
                None
            };
            let found = by_seq.or_else(|| self.by_hash.get(&incoming.fingerprint()).copied());
            if let Some(id) = found {
                if let Some(presence) = self.slots.get(&id) {
                    if !presence.counterparty {
                        let patch = build_patch(*presence, incoming);
                        if !patch.is_empty() {
                            return Disposition::Enriched { existing: id, patch };
                        }
                    }
                }
            }
        }

        if let Some(&id) = self.by_hash.get(&incoming.fingerprint()) {
            return Disposition::Duplicate { existing: id };
        }
        if seq_is_complete {
            if let Some(&id) = self.by_sequence.get(seq) {
                let complete = self
                    .slots
                    .get(&id)
                    .map(|p| p.counterparty)
                    .unwrap_or(false);
                if complete {
                    return Disposition::Duplicate { existing: id };
                }
            }
        }

        Disposition::New
    }

    /// Extend the index after the disposition has been persisted. For
    /// [`Disposition::New`] the ledger-assigned id must be supplied;
    /// without it the record cannot be indexed and is skipped.
    pub fn admit(
        &mut self,
        incoming: &IncomingRecord,
        disposition: &Disposition,
        new_id: Option<TransactionId>,
    ) {
        match disposition {
            Disposition::New => {
                let Some(id) = new_id else { return };
                self.by_hash.insert(incoming.fingerprint(), id);
                self.slots.insert(id, FieldPresence {
                    counterparty: !incoming.counterparty_name.trim().is_empty(),
                    iban: !incoming.counterparty_iban.trim().is_empty(),
                    communication: !incoming.communication.trim().is_empty(),
                });

                let seq = incoming.sequence_number.trim();
                if is_incomplete_sequence(seq) {
                    self.incomplete.push(IncompleteEntry {
                        id,
                        sequence_number: seq.to_string(),
                        dedup_hash: incoming.fingerprint(),
                        execution_date: incoming.execution_date,
                        amount: incoming.amount,
                        counterparty_name: incoming.counterparty_name.clone(),
                        communication: incoming.communication.clone(),
                    });
                } else if !seq.is_empty() {
                    self.by_sequence.insert(seq.to_string(), id);
                }
            }
            Disposition::SequenceCompleted { existing } => {
                if let Some(pos) = self.incomplete.iter().position(|e| e.id == *existing) {
                    let entry = self.incomplete.remove(pos);
                    self.by_hash.remove(&entry.dedup_hash);
                }
                self.by_hash.insert(incoming.fingerprint(), *existing);
                let seq = incoming.sequence_number.trim();
                if !seq.is_empty() {
                    self.by_sequence.insert(seq.to_string(), *existing);
                }
            }
            Disposition::Enriched { existing, patch } => {
                if let Some(presence) = self.slots.get_mut(existing) {
                    presence.counterparty |= patch.counterparty_name.is_some();
                    presence.iban |= patch.counterparty_iban.is_some();
                    presence.communication |= patch.communication.is_some();
                }
            }
            Disposition::Duplicate { .. } => {}
        }
    }
}

fn build_patch(presence: FieldPresence, incoming: &IncomingRecord) -> EnrichmentPatch {
    let fill = |already: bool, value: &str| {
        if !already && !value.trim().is_empty() {
            Some(value.trim().to_string())
        } else {
            None
        }
    };
    EnrichmentPatch {
        counterparty_name: fill(presence.counterparty, &incoming.counterparty_name),
        counterparty_iban: fill(presence.iban, &incoming.counterparty_iban),
        communication: fill(presence.communication, &incoming.communication),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concilio_core::{ReconciliationStatus, TransactionRecord};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn incoming(seq: &str, date: NaiveDate, cents: i64, name: &str, memo: &str) -> IncomingRecord {
        IncomingRecord {
            sequence_number: seq.to_string(),
            execution_date: date,
            value_date: date,
            amount: Money::from_cents(cents),
            counterparty_name: name.to_string(),
            counterparty_iban: String::new(),
            communication: memo.to_string(),
            account_number: "BE02735001234567".to_string(),
        }
    }

    fn ledger_record(id: i64, inc: &IncomingRecord) -> TransactionRecord {
        TransactionRecord {
            id: TransactionId(id),
            sequence_number: inc.sequence_number.clone(),
            dedup_hash: inc.fingerprint(),
            execution_date: inc.execution_date,
            value_date: inc.value_date,
            amount: inc.amount,
            counterparty_name: inc.counterparty_name.clone(),
            counterparty_iban: inc.counterparty_iban.clone(),
            communication: inc.communication.clone(),
            account_number: inc.account_number.clone(),
            category_id: None,
            account_code: None,
            status: ReconciliationStatus::Unverified,
            is_reconciled: false,
            links: Vec::new(),
            parent_id: None,
            child_index: None,
            is_parent: false,
            child_count: 0,
        }
    }

    #[test]
    fn incomplete_sequence_recognition() {
        assert!(is_incomplete_sequence("2025-"));
        assert!(is_incomplete_sequence(" 2025- "));
        assert!(!is_incomplete_sequence("2025-00042"));
        assert!(!is_incomplete_sequence(""));
        assert!(!is_incomplete_sequence("25-"));
    }

    #[test]
    fn unknown_record_is_new() {
        let resolver = ImportResolver::from_ledger(&[]);
        let inc = incoming("2025-00001", d(2025, 3, 1), -1500, "Bakkerij Janssens", "brood");
        assert_eq!(resolver.resolve(&inc), Disposition::New);
    }

    #[test]
    fn second_import_of_same_record_is_duplicate() {
        let inc = incoming("2025-00001", d(2025, 3, 1), -1500, "Bakkerij Janssens", "brood");
        let mut resolver = ImportResolver::from_ledger(&[]);

        let first = resolver.resolve(&inc);
        assert_eq!(first, Disposition::New);
        resolver.admit(&inc, &first, Some(TransactionId(10)));

        assert_eq!(
            resolver.resolve(&inc),
            Disposition::Duplicate { existing: TransactionId(10) }
        );
    }

    #[test]
    fn hash_duplicate_detected_without_sequence_number() {
        let existing = incoming("", d(2025, 3, 1), -1500, "", "");
        let ledger = vec![ledger_record(4, &existing)];
        let resolver = ImportResolver::from_ledger(&ledger);

        // Same content, still no counterparty on either side: the hash alone
        // settles it.
        assert_eq!(
            resolver.resolve(&incoming("", d(2025, 3, 1), -1500, "", "")),
            Disposition::Duplicate { existing: TransactionId(4) }
        );
    }

    #[test]
    fn incomplete_number_is_completed_in_place() {
        let stub = incoming("2025-", d(2025, 5, 12), -8000, "Drukkerij Verhulst", "affiches td");
        let ledger = vec![ledger_record(7, &stub)];
        let resolver = ImportResolver::from_ledger(&ledger);

        let full = incoming("2025-00042", d(2025, 5, 12), -8000, "Drukkerij Verhulst", "affiches td");
        assert_eq!(
            resolver.resolve(&full),
            Disposition::SequenceCompleted { existing: TransactionId(7) }
        );
    }

    #[test]
    fn completion_takes_priority_over_duplicate() {
        // The completed record also exists in full; the incomplete entry
        // still wins because completion is the most specific disposition.
        let stub = incoming("2025-", d(2025, 5, 12), -8000, "Drukkerij Verhulst", "affiches");
        let full = incoming("2025-00042", d(2025, 5, 12), -8000, "Drukkerij Verhulst", "affiches");
        let ledger = vec![ledger_record(1, &stub), ledger_record(2, &full)];
        let resolver = ImportResolver::from_ledger(&ledger);

        assert_eq!(
            resolver.resolve(&full),
            Disposition::SequenceCompleted { existing: TransactionId(1) }
        );
    }

    #[test]
    fn completion_requires_matching_fields() {
        let stub = incoming("2025-", d(2025, 5, 12), -8000, "Drukkerij Verhulst", "affiches");
        let ledger = vec![ledger_record(7, &stub)];
        let resolver = ImportResolver::from_ledger(&ledger);

        // Same prefix, different amount: not the same payment.
        let other = incoming("2025-00099", d(2025, 5, 12), -9000, "Drukkerij Verhulst", "affiches");
        assert_eq!(resolver.resolve(&other), Disposition::New);
    }

    #[test]
    fn completion_respects_year_prefix() {
        let stub = incoming("2024-", d(2025, 1, 2), -8000, "Drukkerij Verhulst", "affiches");
        let ledger = vec![ledger_record(7, &stub)];
        let resolver = ImportResolver::from_ledger(&ledger);

        let full = incoming("2025-00002", d(2025, 1, 2), -8000, "Drukkerij Verhulst", "affiches");
        assert_eq!(resolver.resolve(&full), Disposition::New);
    }

    #[test]
    fn sparse_entry_is_enriched_not_duplicated() {
        let sparse = incoming("2025-00005", d(2025, 2, 2), 2000, "", "");
        let ledger = vec![ledger_record(3, &sparse)];
        let resolver = ImportResolver::from_ledger(&ledger);

        let full = incoming("2025-00005", d(2025, 2, 2), 2000, "Jens Maes", "lidgeld");
        match resolver.resolve(&full) {
            Disposition::Enriched { existing, patch } => {
                assert_eq!(existing, TransactionId(3));
                assert_eq!(patch.counterparty_name.as_deref(), Some("Jens Maes"));
                assert_eq!(patch.communication.as_deref(), Some("lidgeld"));
            }
            other => panic!("expected enrichment, got {other:?}"),
        }
    }

    #[test]
    fn enrichment_never_overwrites_existing_fields() {
        let existing = incoming("2025-00005", d(2025, 2, 2), 2000, "", "lidgeld 2025");
        let ledger = vec![ledger_record(3, &existing)];
        let resolver = ImportResolver::from_ledger(&ledger);

        let full = incoming("2025-00005", d(2025, 2, 2), 2000, "Jens Maes", "iets anders");
        match resolver.resolve(&full) {
            Disposition::Enriched { patch, .. } => {
                assert_eq!(patch.counterparty_name.as_deref(), Some("Jens Maes"));
                // communication was already present; not patched
                assert_eq!(patch.communication, None);
            }
            other => panic!("expected enrichment, got {other:?}"),
        }
    }

    #[test]
    fn later_records_see_index_updates_from_same_batch() {
        let mut resolver = ImportResolver::from_ledger(&[]);

        let inc = incoming("2025-", d(2025, 5, 12), -8000, "Drukkerij Verhulst", "affiches");
        let disp = resolver.resolve(&inc);
        assert_eq!(disp, Disposition::New);
        resolver.admit(&inc, &disp, Some(TransactionId(20)));

        // A later record in the same batch completes the number just admitted.
        let full = incoming("2025-00042", d(2025, 5, 12), -8000, "Drukkerij Verhulst", "affiches");
        assert_eq!(
            resolver.resolve(&full),
            Disposition::SequenceCompleted { existing: TransactionId(20) }
        );
    }

    #[test]
    fn admitted_completion_updates_both_indexes() {
        let stub = incoming("2025-", d(2025, 5, 12), -8000, "Drukkerij Verhulst", "affiches");
        let ledger = vec![ledger_record(7, &stub)];
        let mut resolver = ImportResolver::from_ledger(&ledger);

        let full = incoming("2025-00042", d(2025, 5, 12), -8000, "Drukkerij Verhulst", "affiches");
        let disp = resolver.resolve(&full);
        resolver.admit(&full, &disp, None);

        // Re-importing the full record is now a plain duplicate.
        assert_eq!(
            resolver.resolve(&full),
            Disposition::Duplicate { existing: TransactionId(7) }
        );
    }

    #[test]
    fn children_are_not_indexed() {
        let inc = incoming("2025-00001", d(2025, 3, 1), -1500, "Bakkerij Janssens", "brood");
        let mut child = ledger_record(5, &inc);
        child.parent_id = Some(TransactionId(4));
        child.child_index = Some(1);

        let resolver = ImportResolver::from_ledger(&[child]);
        assert_eq!(resolver.resolve(&inc), Disposition::New);
    }

    #[test]
    fn summary_tallies_dispositions() {
        let mut summary = ImportSummary::default();
        summary.tally(&Disposition::New);
        summary.tally(&Disposition::Duplicate { existing: TransactionId(1) });
        summary.tally(&Disposition::New);
        assert_eq!(summary.new, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.errors, 0);
    }
}
