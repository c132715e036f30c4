//! Winner selection, contradiction detection, and final status assignment.
//!
//! Ordering is pinned: agreement bonus first, the ≥0.60 contradiction
//! threshold tests the bonus-adjusted confidence, and the 0.30 penalty lands
//! last — clamp(base + agreement − penalty). Selection is a pure function of
//! its candidate set: re-running it yields an identical `FinalField`.

use std::collections::BTreeMap;

use veriform_model::{
    Candidate, FieldSpec, FieldStatus, FinalField, ReasonCode,
};

use crate::AUTOFILL_THRESHOLD;

/// Distinct values must each reach this (bonus-adjusted) confidence for a
/// contradiction to register.
pub const CONTRADICTION_MIN_CONFIDENCE: f64 = 0.60;

/// Penalty applied to the otherwise-winning candidate on contradiction.
pub const CONTRADICTION_PENALTY: f64 = 0.30;

/// Field-level facts the selector folds into the rationale.
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    /// Routing produced no documents for this field.
    pub no_readable_docs: bool,
    /// Every input document was unreadable at ingest.
    pub all_docs_unreadable: bool,
    /// The model attempt for this field failed, and how.
    pub llm_failure: Option<ReasonCode>,
}

/// Pick a winner and terminal status for one field.
pub fn select_field(
    field: &FieldSpec,
    mut candidates: Vec<Candidate>,
    ctx: &SelectionContext,
) -> FinalField {
    let accepted: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_accepted())
        .map(|(i, _)| i)
        .collect();

    if accepted.is_empty() {
        return missing_field(field, candidates, ctx);
    }

    // Contradiction: ≥2 distinct normalized values whose best bonus-adjusted
    // confidence clears the threshold.
    let mut best_by_value: BTreeMap<&str, f64> = BTreeMap::new();
    for &i in &accepted {
        let c = &candidates[i];
        let adjusted = c.scores.adjusted_confidence();
        let entry = best_by_value.entry(c.normalized_value.as_str()).or_insert(0.0);
        if adjusted > *entry {
            *entry = adjusted;
        }
    }
    let contradiction = best_by_value
        .values()
        .filter(|&&conf| conf >= CONTRADICTION_MIN_CONFIDENCE)
        .count()
        >= 2;

    // Otherwise-winner: max adjusted confidence, heuristic before model,
    // then earliest document id.
    let mut ranked = accepted.clone();
    ranked.sort_by(|&a, &b| {
        let (ca, cb) = (&candidates[a], &candidates[b]);
        cb.scores
            .adjusted_confidence()
            .total_cmp(&ca.scores.adjusted_confidence())
            .then(ca.from_method.cmp(&cb.from_method))
            .then(ca.primary_doc_id().cmp(cb.primary_doc_id()))
    });
    let winner_idx = ranked[0];

    if contradiction {
        candidates[winner_idx].scores.contradiction_penalty = CONTRADICTION_PENALTY;
    }

    let winner = candidates[winner_idx].clone();
    let confidence = winner.scores.final_confidence();

    // Status never withholds a present value: contradictions and low
    // confidence downgrade to review, not to missing.
    let status = if contradiction {
        FieldStatus::NeedsReview
    } else if confidence < AUTOFILL_THRESHOLD {
        FieldStatus::NeedsReview
    } else {
        FieldStatus::Filled
    };

    let mut rationale = Vec::new();
    if winner.scores.anchor_match >= 1.0 {
        rationale.push(ReasonCode::LiteralAnchor);
    }
    if winner.scores.validator >= 1.0 {
        rationale.push(ReasonCode::ValidatorPassed);
    }
    if winner.scores.cross_doc_agreement > 0.0 {
        rationale.push(ReasonCode::CrossDocAgreement);
    }
    if contradiction {
        rationale.push(ReasonCode::ContradictionFlagged);
    } else if status == FieldStatus::NeedsReview {
        rationale.push(ReasonCode::BelowThreshold);
    }
    if let Some(code) = ctx.llm_failure {
        rationale.push(code);
    }

    let alternatives = alternatives_excluding(&candidates, Some(winner_idx));

    FinalField {
        field: field.key,
        status,
        value: Some(winner.raw_value.clone()),
        normalized_value: Some(winner.normalized_value.clone()),
        confidence,
        rationale,
        evidence: winner.evidence.clone(),
        alternatives,
    }
}

/// Terminal `missing` state: no accepted candidate survived.
fn missing_field(field: &FieldSpec, candidates: Vec<Candidate>, ctx: &SelectionContext) -> FinalField {
    let mut rationale = Vec::new();
    if ctx.no_readable_docs {
        rationale.push(ReasonCode::NoReadableDocs);
    }
    if ctx.all_docs_unreadable {
        rationale.push(ReasonCode::NoTextLayer);
    }
    if candidates
        .iter()
        .any(|c| c.rejected_reasons.contains(&ReasonCode::UnsupportedByEvidence))
    {
        rationale.push(ReasonCode::UnsupportedByEvidence);
    }
    if let Some(code) = ctx.llm_failure {
        rationale.push(code);
    }

    let alternatives = alternatives_excluding(&candidates, None);

    FinalField {
        field: field.key,
        status: FieldStatus::Missing,
        value: None,
        normalized_value: None,
        confidence: 0.0,
        rationale,
        evidence: Vec::new(),
        alternatives,
    }
}

/// Up to 2 non-winner candidates (accepted or rejected), best first.
fn alternatives_excluding(candidates: &[Candidate], winner_idx: Option<usize>) -> Vec<Candidate> {
    let mut alts: Vec<&Candidate> = candidates
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != winner_idx)
        .map(|(_, c)| c)
        .collect();
    alts.sort_by(|a, b| {
        b.scores
            .final_confidence()
            .total_cmp(&a.scores.final_confidence())
            .then(a.from_method.cmp(&b.from_method))
            .then(a.primary_doc_id().cmp(b.primary_doc_id()))
    });
    alts.into_iter().take(2).cloned().collect()
}
