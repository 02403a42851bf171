pub mod dates;
pub mod entity;
pub mod error;
pub mod money;
pub mod record;

pub use dates::DateRange;
pub use entity::{CandidateEntity, EventCandidate, ExpenseCandidate, RegistrationCandidate};
pub use error::{ReconcileError, SplitViolation};
pub use money::Money;
pub use record::{
    ChildDraft, EntityKind, EntityLink, LedgerCommand, LinkOrigin, ReconciliationStatus,
    SplitLine, TransactionId, TransactionRecord,
};
