pub mod hash;
pub mod links;
pub mod matcher;
pub mod resolver;
pub mod similarity;
pub mod split;

pub use links::{SideEffect, Unlinked};
pub use matcher::{
    CashSuggestion, MatchEngine, MatchProposal, MatchReport, MatchTier, MatchWeights,
    SplitSuggestion,
};
pub use resolver::{
    Disposition, EnrichmentPatch, ImportResolver, ImportSummary, IncomingRecord,
};
pub use split::SplitPlan;

pub mod engine {
    use crate::*;
    use concilio_core::TransactionRecord;

    pub fn create_match_engine(weights: MatchWeights) -> MatchEngine {
        MatchEngine::new(weights)
    }

    pub fn create_resolver(ledger: &[TransactionRecord]) -> ImportResolver {
        ImportResolver::from_ledger(ledger)
    }
}
