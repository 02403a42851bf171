use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::dates::DateRange;
use super::money::Money;
use super::record::EntityKind;

/// An event or operation with a budget line, e.g. a members' weekend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCandidate {
    pub id: String,
    pub name: String,
    pub expected_amount: Money,
    pub period: DateRange,
    pub organizer: Option<String>,
    pub description: String,
    pub cash_expected: bool,
}

/// An approved expense claim awaiting reimbursement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseCandidate {
    pub id: String,
    pub claimant: String,
    pub amount: Money,
    pub submitted_on: NaiveDate,
    pub description: String,
}

/// A member registration with an outstanding fee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationCandidate {
    pub id: String,
    pub member_name: String,
    pub fee: Money,
    pub registered_on: NaiveDate,
    pub activity: String,
    pub cash_expected: bool,
}

/// The three entity shapes a transaction can be matched against. The matcher
/// only reads the accessors below, never variant internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CandidateEntity {
    Event(EventCandidate),
    Expense(ExpenseCandidate),
    Registration(RegistrationCandidate),
}

impl CandidateEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            CandidateEntity::Event(_) => EntityKind::Event,
            CandidateEntity::Expense(_) => EntityKind::Expense,
            CandidateEntity::Registration(_) => EntityKind::Registration,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            CandidateEntity::Event(e) => &e.id,
            CandidateEntity::Expense(e) => &e.id,
            CandidateEntity::Registration(r) => &r.id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            CandidateEntity::Event(e) => &e.name,
            CandidateEntity::Expense(e) => &e.description,
            CandidateEntity::Registration(r) => &r.activity,
        }
    }

    /// Magnitude the bank amount is compared against.
    pub fn expected_amount(&self) -> Money {
        match self {
            CandidateEntity::Event(e) => e.expected_amount.abs(),
            CandidateEntity::Expense(e) => e.amount.abs(),
            CandidateEntity::Registration(r) => r.fee.abs(),
        }
    }

    pub fn expected_dates(&self) -> DateRange {
        match self {
            CandidateEntity::Event(e) => e.period,
            CandidateEntity::Expense(e) => DateRange::single(e.submitted_on),
            CandidateEntity::Registration(r) => DateRange::single(r.registered_on),
        }
    }

    /// Name expected on the counterparty side of the bank record.
    pub fn counterpart(&self) -> Option<&str> {
        match self {
            CandidateEntity::Event(e) => e.organizer.as_deref(),
            CandidateEntity::Expense(e) => Some(&e.claimant),
            CandidateEntity::Registration(r) => Some(&r.member_name),
        }
    }

    /// Free text probed for keyword overlap with the bank communication.
    pub fn descriptor(&self) -> &str {
        match self {
            CandidateEntity::Event(e) => &e.description,
            CandidateEntity::Expense(e) => &e.description,
            CandidateEntity::Registration(r) => &r.activity,
        }
    }

    pub fn expects_cash(&self) -> bool {
        match self {
            CandidateEntity::Event(e) => e.cash_expected,
            CandidateEntity::Expense(_) => false,
            CandidateEntity::Registration(r) => r.cash_expected,
        }
    }
}
