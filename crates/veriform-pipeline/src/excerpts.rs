//! Capped, deterministic document excerpts for the model call.
//!
//! Capping rules are locked: documents in routing order, pages ascending,
//! keyword-bearing pages preferred (first page as fallback), per-doc and
//! total character ceilings, last excerpt truncated to fit. The same inputs
//! always produce the same excerpt list.

use serde::{Deserialize, Serialize};
use veriform_model::{field_aliases, FieldSpec, LayoutDoc, RunOptions};

/// A capped excerpt from one document page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocExcerpt {
    pub doc_id: String,
    pub page: u32,
    pub text: String,
}

/// Keywords that mark a page as relevant to a field: key, label, aliases.
fn field_keywords(field: &FieldSpec) -> Vec<String> {
    let mut keywords = vec![field.key.as_str().to_lowercase()];
    if let Some(label) = &field.label {
        keywords.push(label.to_lowercase());
    }
    for alias in field_aliases(field.key) {
        keywords.push(alias.to_lowercase());
    }
    keywords.sort();
    keywords.dedup();
    keywords
}

/// Truncate to a character budget without splitting a code point.
fn take_chars(text: &str, budget: usize) -> &str {
    match text.char_indices().nth(budget) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Build excerpts for one field from its routed documents.
pub fn build_excerpts_for_field(
    field: &FieldSpec,
    routed_docs: &[&LayoutDoc],
    options: &RunOptions,
) -> Vec<DocExcerpt> {
    let keywords = field_keywords(field);
    let mut excerpts = Vec::new();
    let mut total_chars = 0usize;

    for doc in routed_docs {
        if total_chars >= options.excerpt_max_total_chars {
            break;
        }

        let mut pages: Vec<_> = doc.pages.iter().collect();
        pages.sort_by_key(|p| p.page);

        let mut matching: Vec<_> = pages
            .iter()
            .filter(|p| {
                let lower = p.full_text.to_lowercase();
                keywords.iter().any(|kw| lower.contains(kw))
            })
            .copied()
            .collect();
        if matching.is_empty() {
            if let Some(first) = pages.first().copied() {
                matching.push(first);
            }
        }
        matching.truncate(options.excerpt_max_pages_per_doc);

        let mut doc_chars = 0usize;
        for page in matching {
            if total_chars >= options.excerpt_max_total_chars
                || doc_chars >= options.excerpt_max_chars_per_doc
            {
                break;
            }
            let budget = (options.excerpt_max_chars_per_doc - doc_chars)
                .min(options.excerpt_max_total_chars - total_chars);
            let text = take_chars(&page.full_text, budget);
            if text.is_empty() {
                continue;
            }
            let len = text.chars().count();
            excerpts.push(DocExcerpt {
                doc_id: doc.doc_id.clone(),
                page: page.page,
                text: text.to_string(),
            });
            doc_chars += len;
            total_chars += len;
        }
    }

    excerpts
}
