use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub i64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Event,
    Expense,
    Registration,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Event => write!(f, "event"),
            EntityKind::Expense => write!(f, "expense"),
            EntityKind::Registration => write!(f, "registration"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "event" => Ok(EntityKind::Event),
            "expense" => Ok(EntityKind::Expense),
            "registration" => Ok(EntityKind::Registration),
            other => Err(format!("Unknown entity kind: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconciliationStatus {
    Unverified,
    NotFound,
    Reconciled,
}

impl ReconciliationStatus {
    /// Next state in the manual cycle: unverified → notFound → reconciled → unverified.
    pub fn next(self) -> Self {
        match self {
            ReconciliationStatus::Unverified => ReconciliationStatus::NotFound,
            ReconciliationStatus::NotFound => ReconciliationStatus::Reconciled,
            ReconciliationStatus::Reconciled => ReconciliationStatus::Unverified,
        }
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationStatus::Unverified => write!(f, "unverified"),
            ReconciliationStatus::NotFound => write!(f, "notFound"),
            ReconciliationStatus::Reconciled => write!(f, "reconciled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkOrigin {
    Manual,
    Automatic,
}

/// One association between a transaction and a candidate entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityLink {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub entity_name: String,
    pub confidence: u8,
    pub matched_at: DateTime<Utc>,
    pub matched_by: LinkOrigin,
}

/// A ledger entry. Children carry `parent_id`; a parent's own balance is
/// inert while it has children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub sequence_number: String,
    pub dedup_hash: String,
    pub execution_date: NaiveDate,
    pub value_date: NaiveDate,
    pub amount: Money,
    pub counterparty_name: String,
    pub counterparty_iban: String,
    pub communication: String,
    pub account_number: String,
    pub category_id: Option<String>,
    pub account_code: Option<String>,
    pub status: ReconciliationStatus,
    pub is_reconciled: bool,
    pub links: Vec<EntityLink>,
    pub parent_id: Option<TransactionId>,
    pub child_index: Option<u32>,
    pub is_parent: bool,
    pub child_count: u32,
}

impl TransactionRecord {
    pub fn is_child(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Reconciled state is derived: non-empty links, or an explicit
    /// reconciled status set through the manual cycle.
    pub fn derive_reconciled(&self) -> bool {
        !self.links.is_empty() || self.status == ReconciliationStatus::Reconciled
    }

    pub fn has_link(&self, kind: EntityKind, entity_id: &str) -> bool {
        self.links
            .iter()
            .any(|l| l.entity_kind == kind && l.entity_id == entity_id)
    }
}

/// One proposed child during the split workflow. Amount is an unsigned
/// magnitude; the committed child takes the parent's sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitLine {
    pub description: String,
    pub amount: Money,
    pub category_id: Option<String>,
    pub account_code: Option<String>,
    pub notes: Option<String>,
}

/// A child record ready for insertion; ids are assigned by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildDraft {
    pub parent_id: TransactionId,
    pub child_index: u32,
    pub sequence_number: String,
    pub dedup_hash: String,
    pub execution_date: NaiveDate,
    pub value_date: NaiveDate,
    pub amount: Money,
    pub counterparty_name: String,
    pub counterparty_iban: String,
    pub communication: String,
    pub account_number: String,
    pub category_id: Option<String>,
    pub account_code: Option<String>,
}

/// Persistence instruction produced by the split engine. The ledger applies
/// these in order; a mid-sequence failure is reported, not rolled back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerCommand {
    CreateChild(ChildDraft),
    Delete(TransactionId),
    SetSplitFlags {
        id: TransactionId,
        is_parent: bool,
        child_count: u32,
    },
}
