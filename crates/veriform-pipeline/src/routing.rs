//! Field routing: rank source documents per field by lexical overlap.
//!
//! score(doc, field) = |query ∩ doc| / |query| over lowercase alphanumeric
//! tokens of length ≥ 2. Unreadable documents never participate; ties break
//! by ascending doc id so the ranking is stable across runs.

use std::collections::{BTreeMap, BTreeSet};

use veriform_model::{
    field_aliases, DocIndexItem, FieldSpec, LayoutDoc, ResolvedSchema, RoutingEntry,
};

/// Characters of concatenated page text considered per document.
const MAX_DOC_CHARS: usize = 20_000;

/// Tokenize text deterministically: lowercase alphanumeric runs, length ≥ 2.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            for lc in c.to_lowercase() {
                current.push(lc);
            }
        } else if !current.is_empty() {
            if current.chars().count() >= 2 {
                tokens.insert(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if current.chars().count() >= 2 {
        tokens.insert(current);
    }
    tokens
}

/// Token-overlap score in [0, 1]; an empty query scores 0.
pub fn score_query_doc(query: &str, doc_text: &str) -> f64 {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let doc_tokens = tokenize(doc_text);
    let overlap = query_tokens.intersection(&doc_tokens).count();
    (overlap as f64 / query_tokens.len() as f64).clamp(0.0, 1.0)
}

/// Query text for a field: key, label when present, and alias terms.
pub fn build_field_query(field: &FieldSpec) -> String {
    let mut parts: Vec<&str> = vec![field.key.as_str()];
    if let Some(label) = &field.label {
        parts.push(label);
    }
    parts.extend(field_aliases(field.key));
    parts.join(" ")
}

/// Concatenated page text for a document, pages in ascending order, capped.
fn build_doc_text(doc_id: &str, layout: &[LayoutDoc]) -> String {
    let Some(doc) = layout.iter().find(|d| d.doc_id == doc_id) else {
        return String::new();
    };

    let mut pages: Vec<_> = doc.pages.iter().collect();
    pages.sort_by_key(|p| p.page);

    let mut text = String::new();
    for page in pages {
        if text.chars().count() >= MAX_DOC_CHARS {
            break;
        }
        text.push_str(&page.full_text);
    }
    if text.chars().count() > MAX_DOC_CHARS {
        text = text.chars().take(MAX_DOC_CHARS).collect();
    }
    text
}

/// Route each resolved field to its top-k most relevant readable documents.
///
/// Entries come back in ascending field-key order. Zero readable documents
/// yields an empty entry per field; that is a warning, not an error.
pub fn route_docs(
    schema: &ResolvedSchema,
    doc_index: &[DocIndexItem],
    layout: &[LayoutDoc],
    top_k: usize,
) -> Vec<RoutingEntry> {
    let readable: Vec<&DocIndexItem> = doc_index.iter().filter(|d| d.is_readable()).collect();

    let doc_texts: BTreeMap<&str, String> = readable
        .iter()
        .map(|d| (d.doc_id.as_str(), build_doc_text(&d.doc_id, layout)))
        .collect();

    let mut fields: Vec<&FieldSpec> = schema.resolved_fields.iter().collect();
    fields.sort_by_key(|f| f.key);

    let mut entries = Vec::with_capacity(fields.len());
    for field in fields {
        if readable.is_empty() {
            entries.push(RoutingEntry {
                field: field.key,
                doc_ids: Vec::new(),
                scores: BTreeMap::new(),
            });
            continue;
        }

        let query = build_field_query(field);
        let mut scored: Vec<(&str, f64)> = readable
            .iter()
            .map(|d| {
                let text = doc_texts.get(d.doc_id.as_str()).map(String::as_str).unwrap_or("");
                (d.doc_id.as_str(), score_query_doc(&query, text))
            })
            .collect();

        // Descending score, ascending doc_id on ties.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        scored.truncate(top_k);

        entries.push(RoutingEntry {
            field: field.key,
            doc_ids: scored.iter().map(|(id, _)| id.to_string()).collect(),
            scores: scored
                .iter()
                .map(|(id, s)| (id.to_string(), *s))
                .collect(),
        });
    }

    entries
}
