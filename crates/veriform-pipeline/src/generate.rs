//! Per-field candidate generation: the explicit two-state attempt sequence.
//!
//! State 1 is always the heuristic pass. State 2 (the single model call)
//! happens only when the pure predicate over state 1's validated results says
//! so: no accepted candidate, or the best accepted base confidence under the
//! auto-fill threshold. There is no loop and no third state; failures are
//! caught and recorded, never propagated.

use std::collections::BTreeMap;

use veriform_model::{Candidate, FieldSpec, LayoutDoc, ReasonCode, RunOptions};

use crate::evidence::evidence_supports_value;
use crate::excerpts::build_excerpts_for_field;
use crate::heuristics::heuristic_candidates_for_field;
use crate::llm::{CompletionProvider, FieldExtractor};
use crate::score::score_candidate;
use crate::AUTOFILL_THRESHOLD;

/// Call-count instrumentation for one field, asserted by tests against the
/// per-run ceiling (≤1 heuristic pass, ≤1 model call + ≤1 structural retry).
#[derive(Debug, Clone, Default)]
pub struct FieldStats {
    pub heuristic_passes: u32,
    pub heuristic_count: usize,
    pub llm_attempted: bool,
    pub accepted: usize,
    pub rejected: usize,
}

/// Everything generation produced for one field.
#[derive(Debug, Default)]
pub struct FieldOutcome {
    pub candidates: Vec<Candidate>,
    pub stats: FieldStats,
    /// Why the model attempt failed, when it was made and failed.
    pub llm_failure: Option<ReasonCode>,
}

/// Validate and score a batch of candidates in place, splitting accepted
/// from rejected by the deterministic evidence check.
fn check_and_score(
    field: &FieldSpec,
    candidates: &mut [Candidate],
    routing_scores: &BTreeMap<String, f64>,
) {
    for candidate in candidates.iter_mut() {
        if !evidence_supports_value(field.field_type, candidate) {
            candidate
                .rejected_reasons
                .push(ReasonCode::UnsupportedByEvidence);
        }
        score_candidate(candidate, field.field_type, routing_scores);
    }
}

/// Pure predicate over attempt 1's validated results: should the model run?
fn should_attempt_model(candidates: &[Candidate]) -> bool {
    let best_accepted = candidates
        .iter()
        .filter(|c| c.is_accepted())
        .map(|c| c.scores.base_confidence())
        .fold(None::<f64>, |best, conf| {
            Some(best.map_or(conf, |b| b.max(conf)))
        });

    match best_accepted {
        None => true,
        Some(best) => best < AUTOFILL_THRESHOLD,
    }
}

/// Generate candidates for one field over its routed documents.
///
/// A field with no routed documents produces an empty outcome immediately;
/// that situation is reported through routing, not as a generation failure.
pub async fn generate_for_field(
    field: &FieldSpec,
    routed_docs: &[&LayoutDoc],
    routing_scores: &BTreeMap<String, f64>,
    options: &RunOptions,
    provider: &dyn CompletionProvider,
) -> FieldOutcome {
    let mut outcome = FieldOutcome::default();

    if routed_docs.is_empty() {
        return outcome;
    }

    // --- Attempt 1: heuristic pass ---
    outcome.stats.heuristic_passes = 1;
    let mut candidates = heuristic_candidates_for_field(field, routed_docs);
    outcome.stats.heuristic_count = candidates.len();
    check_and_score(field, &mut candidates, routing_scores);

    // --- Attempt 2: single model call, conditionally ---
    if should_attempt_model(&candidates) {
        outcome.stats.llm_attempted = true;
        let excerpts = build_excerpts_for_field(field, routed_docs, options);
        let extractor = FieldExtractor::new(provider);

        match extractor.extract(field, &excerpts, options).await {
            Ok(mut llm_candidates) => {
                check_and_score(field, &mut llm_candidates, routing_scores);
                candidates.extend(llm_candidates);
            }
            Err(err) => {
                let code = if err.is_structural() {
                    ReasonCode::LlmInvalidJson
                } else {
                    ReasonCode::LlmUnavailable
                };
                tracing::warn!(field = %field.key, error = %err, "model attempt failed");
                outcome.llm_failure = Some(code);
            }
        }
    }

    outcome.stats.accepted = candidates.iter().filter(|c| c.is_accepted()).count();
    outcome.stats.rejected = candidates.len() - outcome.stats.accepted;
    outcome.candidates = candidates;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedProvider};
    use veriform_model::{FieldKey, LayoutPage};

    fn doc(doc_id: &str, text: &str) -> LayoutDoc {
        LayoutDoc {
            doc_id: doc_id.to_string(),
            pages: vec![LayoutPage {
                page: 1,
                full_text: text.to_string(),
                spans: vec![],
            }],
        }
    }

    fn spec(key: FieldKey) -> FieldSpec {
        FieldSpec::for_key(key, None)
    }

    fn scores_for(doc_id: &str, score: f64) -> BTreeMap<String, f64> {
        [(doc_id.to_string(), score)].into_iter().collect()
    }

    #[tokio::test]
    async fn strong_heuristic_skips_the_model() {
        let d = doc("doc_001", "DOB: 1980-01-01");
        let provider = ScriptedProvider::new();

        let outcome = generate_for_field(
            &spec(FieldKey::Dob),
            &[&d],
            &scores_for("doc_001", 0.8),
            &RunOptions::default(),
            &provider,
        )
        .await;

        // base = 0.45 + 0.30 + 0.25·0.8 = 0.95, over the threshold
        assert_eq!(provider.call_count(), 0);
        assert!(!outcome.stats.llm_attempted);
        assert_eq!(outcome.stats.heuristic_passes, 1);
        assert_eq!(outcome.stats.accepted, 1);
    }

    #[tokio::test]
    async fn weak_heuristic_triggers_one_model_call() {
        // No anchor keyword near the date: base stays low.
        let d = doc("doc_001", "Visited on 03/04/2021 for follow-up");
        let provider = ScriptedProvider::new();
        provider.push_response(Ok("[]".to_string()));

        let outcome = generate_for_field(
            &spec(FieldKey::Dob),
            &[&d],
            &scores_for("doc_001", 0.2),
            &RunOptions::default(),
            &provider,
        )
        .await;

        assert_eq!(provider.call_count(), 1);
        assert!(outcome.stats.llm_attempted);
        assert!(outcome.llm_failure.is_none());
    }

    #[tokio::test]
    async fn model_candidates_pass_the_same_evidence_gate() {
        let d = doc("doc_001", "No phone digits on this page at all");
        let provider = ScriptedProvider::new();
        // The model asserts a value its own quote does not contain.
        provider.push_response(Ok(serde_json::json!([{
            "raw_value": "555-123-4567",
            "normalized_value": "15551234567",
            "evidence": [{"doc_id": "doc_001", "page": 1, "quoted_text": "call me maybe"}]
        }])
        .to_string()));

        let outcome = generate_for_field(
            &spec(FieldKey::Phone),
            &[&d],
            &scores_for("doc_001", 0.5),
            &RunOptions::default(),
            &provider,
        )
        .await;

        assert_eq!(outcome.stats.accepted, 0);
        assert_eq!(outcome.stats.rejected, 1);
        assert!(outcome.candidates[0]
            .rejected_reasons
            .contains(&ReasonCode::UnsupportedByEvidence));
    }

    #[tokio::test]
    async fn double_structural_failure_records_invalid_json() {
        let d = doc("doc_001", "nothing to anchor on");
        let provider = ScriptedProvider::new();
        provider.push_response(Ok("not json".to_string()));
        provider.push_response(Ok("worse".to_string()));

        let outcome = generate_for_field(
            &spec(FieldKey::Allergies),
            &[&d],
            &scores_for("doc_001", 0.1),
            &RunOptions::default(),
            &provider,
        )
        .await;

        assert_eq!(provider.call_count(), 2);
        assert_eq!(outcome.llm_failure, Some(ReasonCode::LlmInvalidJson));
        assert!(outcome.candidates.is_empty());
    }

    #[tokio::test]
    async fn transport_failure_records_unavailable() {
        let d = doc("doc_001", "nothing useful");
        let provider = ScriptedProvider::new();
        provider.push_response(Err(LlmError::Network("refused".to_string())));

        let outcome = generate_for_field(
            &spec(FieldKey::Medications),
            &[&d],
            &scores_for("doc_001", 0.1),
            &RunOptions::default(),
            &provider,
        )
        .await;

        assert_eq!(provider.call_count(), 1);
        assert_eq!(outcome.llm_failure, Some(ReasonCode::LlmUnavailable));
    }

    #[tokio::test]
    async fn model_failure_keeps_heuristic_candidates() {
        // Heuristic finds an unanchored date (below threshold), model dies;
        // the heuristic candidate must survive.
        let d = doc("doc_001", "Seen 03/04/2021 in clinic");
        let provider = ScriptedProvider::new();
        provider.push_response(Err(LlmError::Timeout));

        let outcome = generate_for_field(
            &spec(FieldKey::Dob),
            &[&d],
            &scores_for("doc_001", 0.2),
            &RunOptions::default(),
            &provider,
        )
        .await;

        assert_eq!(outcome.stats.accepted, 1);
        assert_eq!(outcome.llm_failure, Some(ReasonCode::LlmUnavailable));
    }

    #[tokio::test]
    async fn no_routed_docs_produces_empty_outcome_without_calls() {
        let provider = ScriptedProvider::new();
        let outcome = generate_for_field(
            &spec(FieldKey::Dob),
            &[],
            &BTreeMap::new(),
            &RunOptions::default(),
            &provider,
        )
        .await;

        assert_eq!(provider.call_count(), 0);
        assert_eq!(outcome.stats.heuristic_passes, 0);
        assert!(outcome.candidates.is_empty());
    }

    #[tokio::test]
    async fn ceiling_holds_even_when_model_succeeds() {
        let d = doc("doc_001", "random note with no dates");
        let provider = ScriptedProvider::new();
        provider.push_response(Ok(serde_json::json!([{
            "raw_value": "1980-01-01",
            "normalized_value": "1980-01-01",
            "evidence": [{"doc_id": "doc_001", "page": 1, "quoted_text": "random note with no dates"}]
        }])
        .to_string()));

        let outcome = generate_for_field(
            &spec(FieldKey::Dob),
            &[&d],
            &scores_for("doc_001", 0.3),
            &RunOptions::default(),
            &provider,
        )
        .await;

        assert_eq!(outcome.stats.heuristic_passes, 1);
        assert_eq!(provider.call_count(), 1);
        // The model's date is not supported by its quote, so it is rejected,
        // but no further attempt is made: the ceiling is absolute.
        assert_eq!(outcome.stats.accepted, 0);
    }
}
