//! Heuristic candidate extraction: attempt 1 of the two-attempt ceiling.
//!
//! One deterministic pattern/keyword pass over the routed documents,
//! page-local, no retries. Every extracted value is paired with the literal
//! line it came from as evidence; the evidence check later decides whether
//! that pairing actually supports the value.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use veriform_model::normalize::{normalize_date, normalize_phone, normalize_text};
use veriform_model::{
    Candidate, CandidateScores, Evidence, ExtractionMethod, FieldKey, FieldSpec, LayoutDoc,
};

// --- Pattern tables ---

static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b\d{4}[-/]\d{1,2}[-/]\d{1,2}\b").unwrap(),
        Regex::new(r"\b\d{1,2}[-/]\d{1,2}[-/]\d{4}\b").unwrap(),
        Regex::new(r"\b[A-Za-z]+\s+\d{1,2},?\s+\d{4}\b").unwrap(),
        Regex::new(r"\b\d{1,2}\s+[A-Za-z]+\s+\d{4}\b").unwrap(),
    ]
});

static PHONE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").unwrap(),
        Regex::new(r"\b\d{3}[-.\s]\d{3}[-.\s]\d{4}\b").unwrap(),
        Regex::new(r"\+?1?[-.\s]?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").unwrap(),
        Regex::new(r"\b1\d{10}\b").unwrap(),
        Regex::new(r"\b\d{10}\b").unwrap(),
    ]
});

static NAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)(?:patient\s+)?name\s*:\s*(.+)").unwrap(),
        Regex::new(r"(?i)full\s+name\s*:\s*(.+)").unwrap(),
        Regex::new(r"(?i)patient\s*:\s*(.+)").unwrap(),
    ]
});

static ADDRESS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)address\s*:\s*(.+)").unwrap(),
        Regex::new(r"(?i)street\s*:\s*(.+)").unwrap(),
        Regex::new(r"(?i)mailing\s+address\s*:\s*(.+)").unwrap(),
        Regex::new(r"(?i)home\s+address\s*:\s*(.+)").unwrap(),
    ]
});

static ALLERGY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:allergies|allergy|allergic\s+to|known\s+allergies)\s*:\s*(.+)").unwrap()
});

static MEDICATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:medications|meds|current\s+medications|prescriptions|rx)\s*:\s*(.+)")
        .unwrap()
});

static INSURANCE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z0-9]{4,20}\b").unwrap());

const DOB_KEYWORDS: [&str; 5] = ["dob", "date of birth", "birthdate", "birth date", "born"];
const PHONE_KEYWORDS: [&str; 6] = ["phone", "mobile", "telephone", "tel", "cell", "contact"];
const INSURANCE_KEYWORDS: [&str; 6] = ["member", "policy", "id", "insurance", "subscriber", "group"];

/// How far back from a match the anchor-keyword window reaches.
const ANCHOR_WINDOW: usize = 50;

// --- Helpers ---

fn snap_to_char_boundary(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// The full line containing a match position, trimmed.
fn line_containing(text: &str, match_start: usize) -> &str {
    let line_start = text[..match_start].rfind('\n').map(|p| p + 1).unwrap_or(0);
    let line_end = text[match_start..]
        .find('\n')
        .map(|p| match_start + p)
        .unwrap_or(text.len());
    text[line_start..line_end].trim()
}

/// Whether any keyword appears in the window just before a match.
fn has_anchor_before(text: &str, match_start: usize, keywords: &[&str]) -> bool {
    let start = snap_to_char_boundary(text, match_start.saturating_sub(ANCHOR_WINDOW));
    let context = text[start..match_start].to_lowercase();
    keywords.iter().any(|kw| context.contains(kw))
}

fn heuristic_candidate(
    field: FieldKey,
    raw_value: &str,
    normalized_value: &str,
    doc_id: &str,
    page: u32,
    quoted_text: &str,
    anchor: bool,
) -> Candidate {
    Candidate {
        field,
        raw_value: raw_value.to_string(),
        normalized_value: normalized_value.to_string(),
        evidence: vec![Evidence::new(doc_id, page, quoted_text)],
        from_method: ExtractionMethod::Heuristic,
        validators: Vec::new(),
        rejected_reasons: Vec::new(),
        // Validator and relevance components are filled by the scorer.
        scores: CandidateScores::new(if anchor { 1.0 } else { 0.0 }, 0.0, 0.0),
    }
}

// --- Per-field extractors ---

fn extract_dob(field: &FieldSpec, doc: &LayoutDoc) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for page in &doc.pages {
        let text = &page.full_text;
        for pattern in DATE_PATTERNS.iter() {
            for m in pattern.find_iter(text) {
                let raw = m.as_str().trim();
                let Some(normalized) = normalize_date(raw) else {
                    continue;
                };
                if !seen.insert(normalized.clone()) {
                    continue;
                }
                let quoted = line_containing(text, m.start());
                if quoted.is_empty() {
                    continue;
                }
                let anchor = has_anchor_before(text, m.start(), &DOB_KEYWORDS);
                candidates.push(heuristic_candidate(
                    field.key, raw, &normalized, &doc.doc_id, page.page, quoted, anchor,
                ));
            }
        }
    }
    candidates
}

fn extract_phone(field: &FieldSpec, doc: &LayoutDoc) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for page in &doc.pages {
        let text = &page.full_text;
        for pattern in PHONE_PATTERNS.iter() {
            for m in pattern.find_iter(text) {
                let raw = m.as_str().trim();
                let (normalized, _) = normalize_phone(raw);
                if normalized.len() < 10 {
                    continue;
                }
                if !seen.insert(normalized.clone()) {
                    continue;
                }
                let quoted = line_containing(text, m.start());
                if quoted.is_empty() {
                    continue;
                }
                let anchor = has_anchor_before(text, m.start(), &PHONE_KEYWORDS);
                candidates.push(heuristic_candidate(
                    field.key, raw, &normalized, &doc.doc_id, page.page, quoted, anchor,
                ));
            }
        }
    }
    candidates
}

fn extract_insurance_id(field: &FieldSpec, doc: &LayoutDoc) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for page in &doc.pages {
        for line in page.full_text.lines() {
            let line_lower = line.to_lowercase();
            if !INSURANCE_KEYWORDS.iter().any(|kw| line_lower.contains(kw)) {
                continue;
            }
            for m in INSURANCE_ID_PATTERN.find_iter(line) {
                let raw = m.as_str();
                // An id token is not a date and not one of the label words.
                if normalize_date(raw).is_some() {
                    continue;
                }
                let lower = raw.to_lowercase();
                if matches!(
                    lower.as_str(),
                    "member" | "policy" | "insurance" | "group" | "subscriber"
                ) {
                    continue;
                }
                let normalized = normalize_text(raw);
                if normalized.is_empty() || !seen.insert(normalized.clone()) {
                    continue;
                }
                candidates.push(heuristic_candidate(
                    field.key,
                    raw,
                    &normalized,
                    &doc.doc_id,
                    page.page,
                    line.trim(),
                    true,
                ));
            }
        }
    }
    candidates
}

fn extract_labelled_lines(
    field: &FieldSpec,
    doc: &LayoutDoc,
    patterns: &[Regex],
    min_len: usize,
    max_len: Option<usize>,
    reject_mostly_digits: bool,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for page in &doc.pages {
        for line in page.full_text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            for pattern in patterns {
                let Some(cap) = pattern.captures(line) else {
                    continue;
                };
                let mut raw = cap[1].trim().to_string();
                // Trailing label punctuation is noise, not value.
                while raw.ends_with([',', ';', ':', '.', '|']) {
                    raw.pop();
                }
                let raw = raw.trim().to_string();

                if raw.chars().count() < min_len {
                    continue;
                }
                if let Some(max) = max_len {
                    if raw.chars().count() > max {
                        continue;
                    }
                }
                if reject_mostly_digits {
                    let total = raw.chars().count();
                    let digits = raw.chars().filter(|c| c.is_ascii_digit()).count();
                    if total > 0 && digits * 2 > total {
                        continue;
                    }
                }

                let normalized = normalize_text(&raw);
                if normalized.is_empty() || !seen.insert(normalized.clone()) {
                    continue;
                }
                candidates.push(heuristic_candidate(
                    field.key, &raw, &normalized, &doc.doc_id, page.page, line, true,
                ));
            }
        }
    }
    candidates
}

fn extract_full_name(field: &FieldSpec, doc: &LayoutDoc) -> Vec<Candidate> {
    extract_labelled_lines(field, doc, &NAME_PATTERNS, 2, Some(100), true)
}

fn extract_address(field: &FieldSpec, doc: &LayoutDoc) -> Vec<Candidate> {
    extract_labelled_lines(field, doc, &ADDRESS_PATTERNS, 5, None, false)
}

fn extract_allergies(field: &FieldSpec, doc: &LayoutDoc) -> Vec<Candidate> {
    extract_labelled_lines(
        field,
        doc,
        std::slice::from_ref(&*ALLERGY_PATTERN),
        2,
        None,
        false,
    )
}

fn extract_medications(field: &FieldSpec, doc: &LayoutDoc) -> Vec<Candidate> {
    extract_labelled_lines(
        field,
        doc,
        std::slice::from_ref(&*MEDICATION_PATTERN),
        2,
        None,
        false,
    )
}

/// Single-pass heuristic scan for a field across its routed documents.
///
/// Deterministic: document order is routing order, page order is document
/// order, and duplicate normalized values collapse per document (repeats in
/// *other* documents survive, feeding cross-document agreement).
pub fn heuristic_candidates_for_field(field: &FieldSpec, routed_docs: &[&LayoutDoc]) -> Vec<Candidate> {
    let extract: fn(&FieldSpec, &LayoutDoc) -> Vec<Candidate> = match field.key {
        FieldKey::Dob => extract_dob,
        FieldKey::Phone => extract_phone,
        FieldKey::InsuranceMemberId => extract_insurance_id,
        FieldKey::FullName => extract_full_name,
        FieldKey::Address => extract_address,
        FieldKey::Allergies => extract_allergies,
        FieldKey::Medications => extract_medications,
    };

    let mut all = Vec::new();
    for doc in routed_docs {
        all.extend(extract(field, doc));
    }
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use veriform_model::{FieldSpec, LayoutPage};

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

    #[test]
    fn dob_near_keyword_gets_anchor() {
        let d = doc("doc_001", "Patient intake\nDOB: 01/15/1990\nPhone: 555-123-4567");
        let cands = heuristic_candidates_for_field(&spec(FieldKey::Dob), &[&d]);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].normalized_value, "1990-01-15");
        assert_eq!(cands[0].scores.anchor_match, 1.0);
        assert_eq!(cands[0].evidence[0].quoted_text, "DOB: 01/15/1990");
    }

    #[test]
    fn bare_date_has_no_anchor() {
        let d = doc("doc_001", "Visit on 03/04/2021 went well");
        let cands = heuristic_candidates_for_field(&spec(FieldKey::Dob), &[&d]);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].scores.anchor_match, 0.0);
    }

    #[test]
    fn phone_formats_normalize_to_digits() {
        let d = doc("doc_001", "Contact phone: (555) 123-4567");
        let cands = heuristic_candidates_for_field(&spec(FieldKey::Phone), &[&d]);
        assert!(!cands.is_empty());
        assert_eq!(cands[0].normalized_value, "15551234567");
        assert_eq!(cands[0].scores.anchor_match, 1.0);
    }

    #[test]
    fn duplicate_values_collapse_within_a_doc() {
        let d = doc("doc_001", "DOB: 1990-01-15\nDate of birth: 1990-01-15");
        let cands = heuristic_candidates_for_field(&spec(FieldKey::Dob), &[&d]);
        assert_eq!(cands.len(), 1);
    }

    #[test]
    fn same_value_in_two_docs_yields_two_candidates() {
        let d1 = doc("doc_001", "DOB: 1990-01-15");
        let d2 = doc("doc_002", "Birthdate: 1990-01-15");
        let cands = heuristic_candidates_for_field(&spec(FieldKey::Dob), &[&d1, &d2]);
        assert_eq!(cands.len(), 2);
        assert_ne!(cands[0].evidence[0].doc_id, cands[1].evidence[0].doc_id);
    }

    #[test]
    fn name_line_is_extracted_with_line_evidence() {
        let d = doc("doc_001", "Patient Name: John A. Smith\nDOB: 1980-01-01");
        let cands = heuristic_candidates_for_field(&spec(FieldKey::FullName), &[&d]);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].raw_value, "John A. Smith");
        assert_eq!(cands[0].normalized_value, "john a smith");
        assert_eq!(cands[0].evidence[0].quoted_text, "Patient Name: John A. Smith");
    }

    #[test]
    fn mostly_numeric_name_is_rejected() {
        let d = doc("doc_001", "Name: 12345678 90");
        let cands = heuristic_candidates_for_field(&spec(FieldKey::FullName), &[&d]);
        assert!(cands.is_empty());
    }

    #[test]
    fn insurance_id_found_on_keyword_line() {
        let d = doc("doc_001", "Insurance Member ID: ABC123456\nUnrelated: XYZZY99");
        let cands = heuristic_candidates_for_field(&spec(FieldKey::InsuranceMemberId), &[&d]);
        let values: Vec<&str> = cands.iter().map(|c| c.raw_value.as_str()).collect();
        assert!(values.contains(&"ABC123456"));
        assert!(!values.contains(&"XYZZY99"));
    }

    #[test]
    fn allergies_list_line_is_captured_whole() {
        let d = doc("doc_001", "Known Allergies: Penicillin, Sulfa");
        let cands = heuristic_candidates_for_field(&spec(FieldKey::Allergies), &[&d]);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].normalized_value, "penicillin sulfa");
        assert_eq!(cands[0].raw_value, "Penicillin, Sulfa");
    }

    #[test]
    fn medications_keyword_variants_match() {
        let d = doc("doc_001", "Current Medications: Lisinopril 10mg, Metformin");
        let cands = heuristic_candidates_for_field(&spec(FieldKey::Medications), &[&d]);
        assert_eq!(cands.len(), 1);
        assert!(cands[0].raw_value.starts_with("Lisinopril"));
    }

    #[test]
    fn no_routed_docs_means_no_candidates() {
        let cands = heuristic_candidates_for_field(&spec(FieldKey::Dob), &[]);
        assert!(cands.is_empty());
    }
}
