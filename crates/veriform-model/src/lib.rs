//! Veriform contracts: the typed artifacts exchanged between pipeline stages.
//!
//! Every stage of the pipeline consumes and produces values of these types;
//! they are immutable once produced and serialize 1:1 into the run's JSON
//! artifacts. The central rule they encode: a value with no [`Evidence`] is
//! invalid by construction, and evidence is always a verbatim quotation with
//! a document/page location.
//!
//! ## Pipeline shape
//!
//! ```text
//! ┌──────────┐   ┌────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐
//! │ Resolver │──►│ Router │──►│ Generator │──►│ Validator │──►│ Selector │
//! └──────────┘   └────────┘   └───────────┘   └───────────┘   └──────────┘
//!  ResolvedSchema RoutingEntry  Candidate       rejected or     FinalField
//!                               (+Evidence)     accepted
//! ```
//!
//! Data flows strictly forward; no stage revisits an earlier one.

pub mod fields;
pub mod normalize;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use fields::{field_aliases, field_type, FieldKey, FIELD_ORDER};

// ============================================================================
// Closed vocabularies
// ============================================================================

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Date,
    Phone,
    StringOrList,
}

/// Where the resolved schema came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaSource {
    UserSchema,
    FormFields,
    FallbackV1,
}

/// Terminal status of a field after selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Filled,
    NeedsReview,
    Missing,
}

/// Which attempt produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Pattern/keyword scan. Sorts before `Llm`, which the selector's
    /// tie-break relies on.
    Heuristic,
    Llm,
}

/// Why a document could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreadableReason {
    NoTextLayer,
    ParseError,
}

/// Symbolic reason codes used in rejection lists and final rationales.
///
/// The closed vocabulary is deliberate: tests assert exact membership, and
/// the review UI renders these as badges, so free text is never allowed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    LiteralAnchor,
    ValidatorPassed,
    CrossDocAgreement,
    ContradictionFlagged,
    BelowThreshold,
    UnsupportedByEvidence,
    LlmUnavailable,
    LlmInvalidJson,
    NoReadableDocs,
    NoTextLayer,
    AmbiguousAlias,
}

impl ReasonCode {
    /// Wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::LiteralAnchor => "literal_anchor",
            ReasonCode::ValidatorPassed => "validator_passed",
            ReasonCode::CrossDocAgreement => "cross_doc_agreement",
            ReasonCode::ContradictionFlagged => "contradiction_flagged",
            ReasonCode::BelowThreshold => "below_threshold",
            ReasonCode::UnsupportedByEvidence => "unsupported_by_evidence",
            ReasonCode::LlmUnavailable => "llm_unavailable",
            ReasonCode::LlmInvalidJson => "llm_invalid_json",
            ReasonCode::NoReadableDocs => "no_readable_docs",
            ReasonCode::NoTextLayer => "no_text_layer",
            ReasonCode::AmbiguousAlias => "ambiguous_alias",
        }
    }
}

/// Outcome of a single type-specific validator check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Pass,
    Warn,
    Fail,
}

impl CheckOutcome {
    /// Numeric contribution to the validator score component.
    pub fn score(self) -> f64 {
        match self {
            CheckOutcome::Pass => 1.0,
            CheckOutcome::Warn => 0.6,
            CheckOutcome::Fail => 0.0,
        }
    }
}

/// A named validator check and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorOutcome {
    pub check: String,
    pub outcome: CheckOutcome,
}

impl ValidatorOutcome {
    pub fn new(check: &str, outcome: CheckOutcome) -> Self {
        Self {
            check: check.to_string(),
            outcome,
        }
    }
}

// ============================================================================
// Documents
// ============================================================================

/// Index metadata for one ingested document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocIndexItem {
    pub doc_id: String,
    pub filename: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<usize>,
    pub has_text_layer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unreadable_reason: Option<UnreadableReason>,
    pub sha256: String,
}

impl DocIndexItem {
    /// A doc participates in routing iff it has a text layer and no
    /// unreadable reason.
    pub fn is_readable(&self) -> bool {
        self.has_text_layer && self.unreadable_reason.is_none()
    }
}

/// A span of page text with an optional bounding box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutSpan {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

/// Text content of a single page. Pages are 1-indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutPage {
    pub page: u32,
    pub full_text: String,
    #[serde(default)]
    pub spans: Vec<LayoutSpan>,
}

/// Page-indexed text for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutDoc {
    pub doc_id: String,
    pub pages: Vec<LayoutPage>,
}

// ============================================================================
// Schema
// ============================================================================

/// Specification of a single schema field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: FieldKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldSpec {
    /// Build a spec for a supported key with its canonical type.
    pub fn for_key(key: FieldKey, label: Option<String>) -> Self {
        Self {
            key,
            label,
            field_type: field_type(key),
        }
    }
}

/// The resolved schema for a run: one instance, created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedSchema {
    pub schema_source: SchemaSource,
    pub resolved_fields: Vec<FieldSpec>,
    #[serde(default)]
    pub unsupported_fields: Vec<String>,
}

// ============================================================================
// Routing
// ============================================================================

/// Routing decision for one field: candidate doc ids best-to-worst plus the
/// score each doc earned. Created by the router, never mutated after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingEntry {
    pub field: FieldKey,
    pub doc_ids: Vec<String>,
    pub scores: BTreeMap<String, f64>,
}

// ============================================================================
// Evidence and candidates
// ============================================================================

/// A verbatim quotation plus location, cited as the sole justification for a
/// value. `quoted_text` must be an exact substring of the page's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub doc_id: String,
    pub page: u32,
    pub quoted_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

impl Evidence {
    pub fn new(doc_id: &str, page: u32, quoted_text: &str) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            page,
            quoted_text: quoted_text.to_string(),
            bbox: None,
        }
    }

    /// Structural validity: non-empty locator fields, 1-indexed page.
    pub fn is_well_formed(&self) -> bool {
        !self.doc_id.trim().is_empty() && self.page >= 1 && !self.quoted_text.trim().is_empty()
    }
}

/// Score breakdown for a candidate. All components live in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScores {
    pub anchor_match: f64,
    pub validator: f64,
    pub doc_relevance: f64,
    #[serde(default)]
    pub cross_doc_agreement: f64,
    #[serde(default)]
    pub contradiction_penalty: f64,
}

impl CandidateScores {
    pub fn new(anchor_match: f64, validator: f64, doc_relevance: f64) -> Self {
        Self {
            anchor_match,
            validator,
            doc_relevance,
            cross_doc_agreement: 0.0,
            contradiction_penalty: 0.0,
        }
    }

    /// Weighted base confidence: 0.45·anchor + 0.30·validator + 0.25·relevance.
    pub fn base_confidence(&self) -> f64 {
        clamp01(0.45 * self.anchor_match + 0.30 * self.validator + 0.25 * self.doc_relevance)
    }

    /// Base plus the cross-document agreement bonus. The contradiction
    /// threshold test reads this value.
    pub fn adjusted_confidence(&self) -> f64 {
        clamp01(self.base_confidence() + self.cross_doc_agreement)
    }

    /// clamp(base + agreement − penalty): the confidence the selector ranks by.
    pub fn final_confidence(&self) -> f64 {
        clamp01(self.base_confidence() + self.cross_doc_agreement - self.contradiction_penalty)
    }

    pub fn all_in_range(&self) -> bool {
        [
            self.anchor_match,
            self.validator,
            self.doc_relevance,
            self.cross_doc_agreement,
            self.contradiction_penalty,
        ]
        .iter()
        .all(|v| (0.0..=1.0).contains(v))
    }
}

/// Clamp a score component into [0, 1].
pub fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// A candidate value for a field, with the evidence that produced it.
///
/// Immutable once produced; `rejected_reasons` empty means accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub field: FieldKey,
    pub raw_value: String,
    pub normalized_value: String,
    pub evidence: Vec<Evidence>,
    pub from_method: ExtractionMethod,
    #[serde(default)]
    pub validators: Vec<ValidatorOutcome>,
    #[serde(default)]
    pub rejected_reasons: Vec<ReasonCode>,
    pub scores: CandidateScores,
}

impl Candidate {
    /// A candidate is accepted iff no rejection reason was recorded.
    pub fn is_accepted(&self) -> bool {
        self.rejected_reasons.is_empty()
    }

    /// Doc id of the first evidence item, used by the selector tie-break.
    pub fn primary_doc_id(&self) -> &str {
        self.evidence
            .first()
            .map(|e| e.doc_id.as_str())
            .unwrap_or("")
    }
}

// ============================================================================
// Final result
// ============================================================================

/// The terminal state of one field after selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalField {
    pub field: FieldKey,
    pub status: FieldStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_value: Option<String>,
    pub confidence: f64,
    pub rationale: Vec<ReasonCode>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub alternatives: Vec<Candidate>,
}

/// The final artifact of a run: every resolved field in terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResult {
    pub run_id: String,
    pub schema_source: SchemaSource,
    pub fields: BTreeMap<FieldKey, FinalField>,
}

// ============================================================================
// Run configuration
// ============================================================================

/// Options for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    pub top_k_docs: usize,
    pub max_fields: usize,
    pub llm_model: String,
    pub max_llm_tokens: usize,
    pub llm_timeout_secs: u64,
    pub excerpt_max_total_chars: usize,
    pub excerpt_max_chars_per_doc: usize,
    pub excerpt_max_pages_per_doc: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            top_k_docs: 3,
            max_fields: 7,
            llm_model: "claude-sonnet-4-20250514".to_string(),
            max_llm_tokens: 1200,
            llm_timeout_secs: 60,
            excerpt_max_total_chars: 8000,
            excerpt_max_chars_per_doc: 4000,
            excerpt_max_pages_per_doc: 3,
        }
    }
}

// ============================================================================
// Contract validation
// ============================================================================

/// Violation of an artifact contract, surfaced when re-validating stored
/// artifacts on read.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("evidence must not be empty: candidate for {0:?} has none")]
    EmptyEvidence(FieldKey),
    #[error("malformed evidence for {field:?}: doc_id/page/quoted_text required")]
    MalformedEvidence { field: FieldKey },
    #[error("score {name} out of range [0,1]: {value}")]
    ScoreOutOfRange { name: &'static str, value: f64 },
    #[error("page numbers are 1-indexed, got {0}")]
    PageOutOfRange(u32),
}

impl Candidate {
    /// Re-validate the evidence-first contract after deserialization.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.evidence.is_empty() {
            return Err(ContractError::EmptyEvidence(self.field));
        }
        for ev in &self.evidence {
            if !ev.is_well_formed() {
                if ev.page < 1 {
                    return Err(ContractError::PageOutOfRange(ev.page));
                }
                return Err(ContractError::MalformedEvidence { field: self.field });
            }
        }
        if !self.scores.all_in_range() {
            return Err(ContractError::ScoreOutOfRange {
                name: "scores",
                value: f64::NAN,
            });
        }
        Ok(())
    }
}

impl FinalField {
    /// Non-null values must carry evidence; confidence must be in range.
    pub fn validate(&self) -> Result<(), ContractError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ContractError::ScoreOutOfRange {
                name: "confidence",
                value: self.confidence,
            });
        }
        if self.value.is_some() && self.evidence.is_empty() {
            return Err(ContractError::EmptyEvidence(self.field));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_iff_no_rejection_reasons() {
        let mut c = Candidate {
            field: FieldKey::FullName,
            raw_value: "John A. Smith".to_string(),
            normalized_value: "john a smith".to_string(),
            evidence: vec![Evidence::new("doc_001", 1, "Patient Name: John A. Smith")],
            from_method: ExtractionMethod::Heuristic,
            validators: vec![],
            rejected_reasons: vec![],
            scores: CandidateScores::new(1.0, 1.0, 0.5),
        };
        assert!(c.is_accepted());
        c.rejected_reasons.push(ReasonCode::UnsupportedByEvidence);
        assert!(!c.is_accepted());
    }

    #[test]
    fn base_confidence_uses_fixed_weights() {
        let s = CandidateScores::new(1.0, 1.0, 1.0);
        assert!((s.base_confidence() - 1.0).abs() < 1e-9);
        let s = CandidateScores::new(1.0, 0.0, 0.0);
        assert!((s.base_confidence() - 0.45).abs() < 1e-9);
    }

    #[test]
    fn final_confidence_clamps_both_ends() {
        let mut s = CandidateScores::new(1.0, 1.0, 1.0);
        s.cross_doc_agreement = 0.10;
        assert!((s.final_confidence() - 1.0).abs() < 1e-9);
        let mut s = CandidateScores::new(0.0, 0.0, 0.0);
        s.contradiction_penalty = 0.30;
        assert!((s.final_confidence() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn candidate_without_evidence_fails_contract() {
        let c = Candidate {
            field: FieldKey::Dob,
            raw_value: "1980-01-01".to_string(),
            normalized_value: "1980-01-01".to_string(),
            evidence: vec![],
            from_method: ExtractionMethod::Llm,
            validators: vec![],
            rejected_reasons: vec![],
            scores: CandidateScores::new(1.0, 0.0, 0.0),
        };
        assert!(matches!(c.validate(), Err(ContractError::EmptyEvidence(_))));
    }

    #[test]
    fn reason_codes_serialize_snake_case() {
        let json = serde_json::to_string(&ReasonCode::UnsupportedByEvidence).unwrap();
        assert_eq!(json, "\"unsupported_by_evidence\"");
        let json = serde_json::to_string(&ReasonCode::NoReadableDocs).unwrap();
        assert_eq!(json, "\"no_readable_docs\"");
    }

    #[test]
    fn heuristic_sorts_before_llm() {
        assert!(ExtractionMethod::Heuristic < ExtractionMethod::Llm);
    }
}
