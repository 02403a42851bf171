//! Scoring of bank transactions against candidate entities.
//!
//! Confidence is a weighted blend of amount, date and counterparty-name
//! proximity on a 0..100 scale, plus a flat bonus when the bank
//! communication mentions the candidate. When one side carries no usable
//! counterparty name the name weight is dropped and the remaining weights
//! are renormalized, so sparse bank data is not penalized for missing
//! evidence.

use serde::{Deserialize, Serialize};

use concilio_core::{CandidateEntity, EntityKind, Money, TransactionId, TransactionRecord};

use crate::similarity;

/// Tunable scoring constants. Loadable from TOML; defaults mirror the
/// values the treasury has been run with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    pub amount_weight: f32,
    pub date_weight: f32,
    pub name_weight: f32,
    /// Flat bonus (0..100 points) when memo and candidate label overlap.
    pub keyword_bonus: u8,
    /// At or above: safe to reconcile without review.
    pub auto_threshold: u8,
    /// Below: the pair is not surfaced at all.
    pub quality_floor: u8,
    /// Relative amount difference still considered a full match.
    pub amount_band_tight: f32,
    /// Relative amount difference beyond which the amount score is zero.
    pub amount_band_wide: f32,
    /// Days beyond which the date score is zero.
    pub date_window_days: i64,
    /// A transaction larger than `split_margin` times the candidate's
    /// expected amount is proposed as a split, not a direct match.
    pub split_margin: f32,
    /// Floor for surfacing a cash-payment suggestion on a cash-expecting
    /// candidate that missed the quality floor.
    pub cash_floor: u8,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            amount_weight: 0.5,
            date_weight: 0.3,
            name_weight: 0.2,
            keyword_bonus: 20,
            auto_threshold: 85,
            quality_floor: 50,
            amount_band_tight: 0.10,
            amount_band_wide: 0.20,
            date_window_days: 90,
            split_margin: 1.5,
            cash_floor: 25,
        }
    }
}

impl MatchWeights {
    pub fn from_toml(toml_content: &str) -> Result<Self, String> {
        toml::from_str(toml_content).map_err(|e| format!("Failed to parse TOML: {e}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    /// Confidence at or above the auto threshold.
    Auto,
    /// Above the quality floor but needs a treasurer's eye.
    Review,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchProposal {
    pub transaction_id: TransactionId,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub entity_name: String,
    pub confidence: u8,
    pub tier: MatchTier,
    pub rationale: String,
}

/// The transaction looks like one payment covering several entities of the
/// same kind, e.g. a bulk transfer for a batch of registrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSuggestion {
    pub transaction_id: TransactionId,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub entity_name: String,
    pub suggested_lines: u32,
    pub rationale: String,
}

/// Low-confidence pairing with a candidate that expects cash; surfaced for
/// information only, never auto-applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashSuggestion {
    pub transaction_id: TransactionId,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub entity_name: String,
    pub confidence: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchReport {
    pub proposals: Vec<MatchProposal>,
    pub split_suggestions: Vec<SplitSuggestion>,
    pub cash_suggestions: Vec<CashSuggestion>,
}

#[derive(Debug, Clone)]
pub struct PairScore {
    pub confidence: u8,
    /// Confidence with the amount component dropped; used to judge whether
    /// an oversized transaction still belongs to this candidate.
    pub affinity: u8,
    pub rationale: String,
}

pub struct MatchEngine {
    weights: MatchWeights,
}

const KIND_ORDER: [EntityKind; 3] = [EntityKind::Event, EntityKind::Expense, EntityKind::Registration];

impl MatchEngine {
    pub fn new(weights: MatchWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &MatchWeights {
        &self.weights
    }

    /// Score one (transaction, candidate) pair.
    pub fn score_pair(&self, tx: &TransactionRecord, cand: &CandidateEntity) -> PairScore {
        let w = &self.weights;

        let amount = similarity::amount_proximity(
            tx.amount,
            cand.expected_amount(),
            w.amount_band_tight,
            w.amount_band_wide,
        );
        let date = similarity::date_proximity(
            tx.execution_date,
            cand.expected_dates(),
            w.date_window_days,
        );

        let tx_name = tx.counterparty_name.trim();
        let name = match (tx_name.is_empty(), cand.counterpart()) {
            (false, Some(counterpart)) => {
                let direct = similarity::name_similarity(tx_name, counterpart);
                let via_label = similarity::name_similarity(tx_name, cand.display_name());
                Some(direct.max(via_label))
            }
            _ => None,
        };

        let keyword = similarity::keyword_overlap(&tx.communication, cand.display_name())
            || similarity::keyword_overlap(&tx.communication, cand.descriptor());

        let confidence = self.blend(Some(amount), date, name, keyword);
        let affinity = self.blend(None, date, name, keyword);

        let mut parts = vec![format!(
            "amount {} vs expected {}",
            tx.amount.abs(),
            cand.expected_amount()
        )];
        parts.push(if date >= 1.0 {
            format!("date {} inside expected window", tx.execution_date)
        } else {
            format!(
                "date {} is {} days from expected",
                tx.execution_date,
                cand.expected_dates().distance_days(tx.execution_date)
            )
        });
        if let (Some(score), Some(counterpart)) = (name, cand.counterpart()) {
            if score >= 0.8 {
                parts.push(format!("counterparty resembles '{counterpart}'"));
            }
        }
        if keyword {
            parts.push(format!("communication mentions '{}'", cand.display_name()));
        }

        PairScore {
            confidence,
            affinity,
            rationale: parts.join("; "),
        }
    }

    fn blend(&self, amount: Option<f32>, date: f32, name: Option<f32>, keyword: bool) -> u8 {
        let w = &self.weights;
        // Absent evidence drops out of the blend entirely: the remaining
        // weights are renormalized rather than scoring a missing component
        // as zero.
        let mut weighted = w.date_weight * date;
        let mut denom = w.date_weight;
        if let Some(a) = amount {
            weighted += w.amount_weight * a;
            denom += w.amount_weight;
        }
        if let Some(n) = name {
            weighted += w.name_weight * n;
            denom += w.name_weight;
        }

        let mut points = (100.0 * weighted / denom).round() as i32;
        if keyword {
            points += i32::from(w.keyword_bonus);
        }
        points.clamp(0, 100) as u8
    }

    /// Score every unmatched transaction against the candidate set. Per
    /// transaction only the best candidate per entity kind survives; order
    /// of the output follows input order, so identical inputs give
    /// byte-identical reports.
    pub fn find_matches(
        &self,
        transactions: &[TransactionRecord],
        candidates: &[CandidateEntity],
    ) -> MatchReport {
        let w = &self.weights;
        let mut report = MatchReport::default();

        for tx in transactions {
            if tx.is_parent || tx.derive_reconciled() {
                continue;
            }

            for kind in KIND_ORDER {
                let mut best: Option<(PairScore, &CandidateEntity)> = None;
                let mut best_cash: Option<(u8, &CandidateEntity)> = None;

                for cand in candidates.iter().filter(|c| c.kind() == kind) {
                    let score = self.score_pair(tx, cand);
                    if cand.expects_cash() {
                        let current = best_cash.as_ref().map(|(c, _)| *c).unwrap_or(0);
                        if score.confidence > current {
                            best_cash = Some((score.confidence, cand));
                        }
                    }
                    let beats = best
                        .as_ref()
                        .map(|(b, _)| score.confidence > b.confidence)
                        .unwrap_or(true);
                    if beats {
                        best = Some((score, cand));
                    }
                }

                let Some((score, cand)) = best else { continue };

                let expected_cents = cand.expected_amount().to_cents();
                let oversized = expected_cents > 0
                    && tx.amount.abs().to_cents() as f32 > w.split_margin * expected_cents as f32;

                if oversized && score.affinity >= w.quality_floor {
                    let lines = suggested_line_count(tx.amount, candidates, kind);
                    report.split_suggestions.push(SplitSuggestion {
                        transaction_id: tx.id,
                        entity_kind: kind,
                        entity_id: cand.id().to_string(),
                        entity_name: cand.display_name().to_string(),
                        suggested_lines: lines,
                        rationale: format!(
                            "{}; amount covers roughly {lines} entries of this kind",
                            score.rationale
                        ),
                    });
                } else if score.confidence >= w.quality_floor {
                    report.proposals.push(MatchProposal {
                        transaction_id: tx.id,
                        entity_kind: kind,
                        entity_id: cand.id().to_string(),
                        entity_name: cand.display_name().to_string(),
                        confidence: score.confidence,
                        tier: if score.confidence >= w.auto_threshold {
                            MatchTier::Auto
                        } else {
                            MatchTier::Review
                        },
                        rationale: score.rationale,
                    });
                } else if let Some((cash_confidence, cash_cand)) = best_cash {
                    if cash_confidence >= w.cash_floor {
                        report.cash_suggestions.push(CashSuggestion {
                            transaction_id: tx.id,
                            entity_kind: kind,
                            entity_id: cash_cand.id().to_string(),
                            entity_name: cash_cand.display_name().to_string(),
                            confidence: cash_confidence,
                        });
                    }
                }
            }
        }

        report
    }
}

/// Estimated number of split lines: transaction magnitude over the average
/// expected amount of this kind's candidates, rounded, never below 2.
fn suggested_line_count(amount: Money, candidates: &[CandidateEntity], kind: EntityKind) -> u32 {
    let amounts: Vec<i64> = candidates
        .iter()
        .filter(|c| c.kind() == kind)
        .map(|c| c.expected_amount().to_cents())
        .filter(|&cents| cents > 0)
        .collect();
    if amounts.is_empty() {
        return 2;
    }
    let average = amounts.iter().sum::<i64>() as f64 / amounts.len() as f64;
    let count = (amount.abs().to_cents() as f64 / average).round() as u32;
    count.max(2)
}
