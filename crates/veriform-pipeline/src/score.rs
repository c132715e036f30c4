//! Confidence scoring: reproducible, component-wise, no randomness.
//!
//! base = 0.45·anchor_match + 0.30·validator + 0.25·doc_relevance, clamped at
//! every step. The validator component is the mean of type-specific check
//! outcomes; the cross-document agreement bonus is a flat +0.10 applied once
//! per agreeing candidate.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use veriform_model::normalize::{normalize_phone, extract_digits};
use veriform_model::{Candidate, CheckOutcome, FieldType, ValidatorOutcome};

/// Flat bonus when ≥2 accepted candidates in distinct documents agree.
pub const AGREEMENT_BONUS: f64 = 0.10;

static ISO_DATE_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Oldest plausible age for a date-of-birth, in years.
const MAX_AGE_YEARS: i32 = 120;

/// Run the type-specific validator checks for a value.
///
/// Every type gets `non_empty`; dates add `format` and `plausible` (not in
/// the future, age under 120); phones add `format` (≥10 digits) and
/// `default_country`, which warns when a country code had to be assumed.
pub fn run_validator_checks(
    field_type: FieldType,
    raw_value: &str,
    normalized_value: &str,
) -> Vec<ValidatorOutcome> {
    let mut checks = vec![ValidatorOutcome::new(
        "non_empty",
        if normalized_value.trim().is_empty() {
            CheckOutcome::Fail
        } else {
            CheckOutcome::Pass
        },
    )];

    match field_type {
        FieldType::Date => {
            let format_ok = ISO_DATE_FORMAT.is_match(normalized_value);
            checks.push(ValidatorOutcome::new(
                "format",
                if format_ok { CheckOutcome::Pass } else { CheckOutcome::Fail },
            ));
            checks.push(ValidatorOutcome::new(
                "plausible",
                if format_ok && date_is_plausible(normalized_value) {
                    CheckOutcome::Pass
                } else {
                    CheckOutcome::Fail
                },
            ));
        }
        FieldType::Phone => {
            let digits = extract_digits(normalized_value);
            checks.push(ValidatorOutcome::new(
                "format",
                if digits.len() >= 10 && digits.len() == normalized_value.len() {
                    CheckOutcome::Pass
                } else {
                    CheckOutcome::Fail
                },
            ));
            let (_, assumed) = normalize_phone(raw_value);
            checks.push(ValidatorOutcome::new(
                "default_country",
                if assumed { CheckOutcome::Warn } else { CheckOutcome::Pass },
            ));
        }
        FieldType::String | FieldType::StringOrList => {}
    }

    checks
}

/// A calendar-valid date that is not in the future and implies an age under
/// the plausibility ceiling.
fn date_is_plausible(normalized_value: &str) -> bool {
    let Ok(date) = NaiveDate::parse_from_str(normalized_value, "%Y-%m-%d") else {
        return false;
    };
    let today = Utc::now().date_naive();
    date <= today && today.year() - date.year() < MAX_AGE_YEARS
}

/// Mean of check outcomes (pass 1.0, warn 0.6, fail 0.0).
pub fn validator_score(checks: &[ValidatorOutcome]) -> f64 {
    if checks.is_empty() {
        return 0.0;
    }
    let sum: f64 = checks.iter().map(|c| c.outcome.score()).sum();
    (sum / checks.len() as f64).clamp(0.0, 1.0)
}

/// Fill in a candidate's validator and document-relevance components.
///
/// `doc_relevance` is the routing score of the evidence's source document;
/// evidence citing an unrouted document scores 0.
pub fn score_candidate(
    candidate: &mut Candidate,
    field_type: FieldType,
    routing_scores: &BTreeMap<String, f64>,
) {
    let checks = run_validator_checks(field_type, &candidate.raw_value, &candidate.normalized_value);
    candidate.scores.validator = validator_score(&checks);
    candidate.validators = checks;

    candidate.scores.doc_relevance = routing_scores
        .get(candidate.primary_doc_id())
        .copied()
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
}

/// Apply the cross-document agreement bonus in place.
///
/// Accepted candidates sharing a normalized value across ≥2 distinct
/// documents each get the flat bonus; extra agreeing documents do not stack.
pub fn apply_agreement_bonus(candidates: &mut [Candidate]) {
    let mut docs_by_value: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for c in candidates.iter().filter(|c| c.is_accepted()) {
        docs_by_value
            .entry(c.normalized_value.as_str())
            .or_default()
            .insert(c.primary_doc_id());
    }

    let agreeing: BTreeSet<String> = docs_by_value
        .into_iter()
        .filter(|(_, docs)| docs.len() >= 2)
        .map(|(value, _)| value.to_string())
        .collect();

    for c in candidates.iter_mut() {
        if c.is_accepted() && agreeing.contains(&c.normalized_value) {
            c.scores.cross_doc_agreement = AGREEMENT_BONUS;
        }
    }
}
