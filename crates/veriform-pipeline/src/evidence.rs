//! The deterministic hallucination check.
//!
//! A candidate survives only if its cited quotations support its value under
//! a fixed substring/pattern rule. No fuzzy matching, no model involvement:
//! the same candidate and evidence always produce the same verdict.

use veriform_model::normalize::{extract_digits, month_names, normalize_text};
use veriform_model::{Candidate, FieldType};

/// Accept or reject a candidate against its own evidence.
///
/// Structural requirements first (non-empty, well-formed evidence), then the
/// field-type rule:
/// - string: normalized value is a substring of a normalized evidence text
/// - date: the `YYYY-MM-DD` value matches a date-like substring in evidence
/// - phone: value digits appear in evidence digits, separators ignored
/// - list: every individual item passes the substring rule, or the whole
///   candidate is rejected
pub fn evidence_supports_value(field_type: FieldType, candidate: &Candidate) -> bool {
    if candidate.evidence.is_empty() {
        return false;
    }
    if candidate.evidence.iter().any(|ev| !ev.is_well_formed()) {
        return false;
    }

    let texts: Vec<&str> = candidate
        .evidence
        .iter()
        .map(|ev| ev.quoted_text.as_str())
        .collect();

    match field_type {
        FieldType::Date => supports_date(&candidate.normalized_value, &texts),
        FieldType::Phone => supports_phone(&candidate.normalized_value, &texts),
        FieldType::StringOrList => supports_list(&candidate.normalized_value, &texts),
        FieldType::String => supports_string(&candidate.normalized_value, &texts),
    }
}

fn supports_string(normalized_value: &str, evidence_texts: &[&str]) -> bool {
    let value = normalize_text(normalized_value);
    if value.is_empty() {
        return false;
    }
    evidence_texts
        .iter()
        .any(|ev| normalize_text(ev).contains(&value))
}

/// Date support: the evidence must contain the same calendar date in some
/// recognizable written form. Zero-padding and `-` vs `/` both vary in the
/// wild, so all variants are checked literally.
fn supports_date(normalized_value: &str, evidence_texts: &[&str]) -> bool {
    let Some((year, month, day)) = split_iso_date(normalized_value) else {
        return false;
    };

    let numeric_forms = [
        format!("{year}-{month:02}-{day:02}"),
        format!("{year}/{month:02}/{day:02}"),
        format!("{year}-{month}-{day}"),
        format!("{year}/{month}/{day}"),
        format!("{month:02}-{day:02}-{year}"),
        format!("{month:02}/{day:02}/{year}"),
        format!("{month}-{day}-{year}"),
        format!("{month}/{day}/{year}"),
    ];

    for ev in evidence_texts {
        if numeric_forms.iter().any(|form| ev.contains(form.as_str())) {
            return true;
        }

        // Month-name forms: the year, the (unpadded) day, and a spelling of
        // the month must all be present.
        let ev_lower = ev.to_lowercase();
        if ev.contains(&year.to_string())
            && ev.contains(&day.to_string())
            && month_names(month).iter().any(|name| ev_lower.contains(name))
        {
            return true;
        }
    }

    false
}

fn split_iso_date(value: &str) -> Option<(u32, u32, u32)> {
    let mut parts = value.splitn(3, '-');
    let year = parts.next()?.parse().ok()?;
    let month = parts.next()?.parse().ok()?;
    let day = parts.next()?.parse().ok()?;
    Some((year, month, day))
}

/// Phone support: digit-sequence containment, tolerating a leading `1`
/// country code present on either side but not the other.
fn supports_phone(normalized_value: &str, evidence_texts: &[&str]) -> bool {
    let value_digits = extract_digits(normalized_value);
    if value_digits.len() < 10 {
        return false;
    }

    for ev in evidence_texts {
        let ev_digits = extract_digits(ev);
        if ev_digits.contains(&value_digits) {
            return true;
        }
        if let Some(stripped) = value_digits.strip_prefix('1') {
            if ev_digits.contains(stripped) {
                return true;
            }
        }
    }

    false
}

/// List support: a comma/semicolon-separated value is checked item by item
/// against the combined evidence; a single failing item rejects everything.
fn supports_list(normalized_value: &str, evidence_texts: &[&str]) -> bool {
    if !normalized_value.contains([',', ';']) {
        return supports_string(normalized_value, evidence_texts);
    }

    let items: Vec<&str> = normalized_value
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return false;
    }

    let combined = normalize_text(&evidence_texts.join(" "));
    items.iter().all(|item| {
        let norm_item = normalize_text(item);
        !norm_item.is_empty() && combined.contains(&norm_item)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use veriform_model::{CandidateScores, Evidence, ExtractionMethod, FieldKey};

    fn candidate(field: FieldKey, normalized: &str, quotes: &[&str]) -> Candidate {
        Candidate {
            field,
            raw_value: normalized.to_string(),
            normalized_value: normalized.to_string(),
            evidence: quotes
                .iter()
                .map(|q| Evidence::new("doc_001", 1, q))
                .collect(),
            from_method: ExtractionMethod::Llm,
            validators: vec![],
            rejected_reasons: vec![],
            scores: CandidateScores::new(1.0, 0.0, 0.0),
        }
    }

    #[test]
    fn string_value_must_be_quoted_substring() {
        let c = candidate(
            FieldKey::FullName,
            "john a smith",
            &["Patient Name: John A. Smith"],
        );
        assert!(evidence_supports_value(FieldType::String, &c));

        let c = candidate(FieldKey::FullName, "jane doe", &["Patient Name: John A. Smith"]);
        assert!(!evidence_supports_value(FieldType::String, &c));
    }

    #[test]
    fn date_matches_across_written_forms() {
        for quote in [
            "DOB: 1980-01-01",
            "DOB: 1980/01/01",
            "Born 01/01/1980",
            "Born 1/1/1980",
            "Date of birth: January 1, 1980",
            "Date of birth: 1 Jan 1980",
        ] {
            let c = candidate(FieldKey::Dob, "1980-01-01", &[quote]);
            assert!(
                evidence_supports_value(FieldType::Date, &c),
                "should accept {quote:?}"
            );
        }

        let c = candidate(FieldKey::Dob, "1980-01-01", &["DOB: 1981-01-01"]);
        assert!(!evidence_supports_value(FieldType::Date, &c));
    }

    #[test]
    fn phone_ignores_separators_and_country_code() {
        let c = candidate(FieldKey::Phone, "15551234567", &["Phone: (555) 123-4567"]);
        assert!(evidence_supports_value(FieldType::Phone, &c));

        let c = candidate(FieldKey::Phone, "15551234567", &["Phone: +1 555 123 4567"]);
        assert!(evidence_supports_value(FieldType::Phone, &c));

        let c = candidate(FieldKey::Phone, "15559876543", &["Phone: 555-123-4567"]);
        assert!(!evidence_supports_value(FieldType::Phone, &c));
    }

    #[test]
    fn one_unsupported_list_item_rejects_the_whole_candidate() {
        let c = candidate(
            FieldKey::Allergies,
            "penicillin, sulfa",
            &["Allergies: Penicillin, Sulfa"],
        );
        assert!(evidence_supports_value(FieldType::StringOrList, &c));

        let c = candidate(
            FieldKey::Allergies,
            "penicillin, latex",
            &["Allergies: Penicillin, Sulfa"],
        );
        assert!(!evidence_supports_value(FieldType::StringOrList, &c));
    }

    #[test]
    fn list_items_may_span_multiple_evidence_texts() {
        let c = candidate(
            FieldKey::Medications,
            "lisinopril, metformin",
            &["Meds: Lisinopril 10mg", "Also taking Metformin"],
        );
        assert!(evidence_supports_value(FieldType::StringOrList, &c));
    }

    #[test]
    fn empty_or_malformed_evidence_never_supports() {
        let mut c = candidate(FieldKey::FullName, "john", &["John"]);
        c.evidence.clear();
        assert!(!evidence_supports_value(FieldType::String, &c));

        let mut c = candidate(FieldKey::FullName, "john", &["John"]);
        c.evidence[0].page = 0;
        assert!(!evidence_supports_value(FieldType::String, &c));

        let c = candidate(FieldKey::FullName, "john", &["   "]);
        assert!(!evidence_supports_value(FieldType::String, &c));
    }
}
