//! Schema resolution.
//!
//! Strict highest-wins precedence, no merging across tiers:
//! 1. user-provided schema JSON
//! 2. form-derived field names (mapped through the alias tables)
//! 3. the fixed fallback field set
//!
//! Resolution never stops a run: malformed or unusable sources fall through
//! to the next tier with a recorded warning.

use serde::Deserialize;
use veriform_model::{
    field_aliases, FieldKey, FieldSpec, ReasonCode, ResolvedSchema, RunOptions, SchemaSource,
    FIELD_ORDER,
};

/// A non-fatal problem observed while resolving the schema.
#[derive(Debug, Clone)]
pub struct SchemaWarning {
    pub kind: &'static str,
    pub message: String,
}

impl SchemaWarning {
    fn new(kind: &'static str, message: String) -> Self {
        Self { kind, message }
    }
}

/// Wire shape of a user-provided schema: `{"fields": [{"key": ..}, ..]}`.
#[derive(Debug, Deserialize)]
struct UserSchemaDoc {
    fields: Vec<UserSchemaField>,
}

#[derive(Debug, Deserialize)]
struct UserSchemaField {
    key: Option<String>,
    label: Option<String>,
    // A user-supplied type is accepted on the wire but ignored: the canonical
    // per-key type always wins, so a key carries one consistent type.
    #[serde(rename = "type")]
    _field_type: Option<serde_json::Value>,
}

/// Resolve the schema for a run.
pub fn resolve_schema(
    user_schema_json: Option<&[u8]>,
    form_fields: Option<&[String]>,
    options: &RunOptions,
    warnings: &mut Vec<SchemaWarning>,
) -> ResolvedSchema {
    if let Some(bytes) = user_schema_json {
        if let Some(resolved) = parse_user_schema(bytes, options, warnings) {
            return resolved;
        }
    }

    if let Some(names) = form_fields {
        if let Some(resolved) = resolve_from_form_fields(names, options, warnings) {
            return resolved;
        }
    }

    fallback_schema(options)
}

/// Tier 1: user schema. Unsupported keys are reported, never fatal; a valid
/// document with zero supported keys still resolves (with zero fields).
/// Returns `None` only when the bytes are not a schema document at all.
fn parse_user_schema(
    bytes: &[u8],
    options: &RunOptions,
    warnings: &mut Vec<SchemaWarning>,
) -> Option<ResolvedSchema> {
    let doc: UserSchemaDoc = match serde_json::from_slice(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            warnings.push(SchemaWarning::new(
                "user_schema_invalid",
                format!("failed to parse schema JSON: {e}"),
            ));
            return None;
        }
    };

    let mut resolved: Vec<FieldSpec> = Vec::new();
    let mut unsupported: Vec<String> = Vec::new();

    for item in doc.fields {
        let Some(key_str) = item.key else { continue };
        match key_str.parse::<FieldKey>() {
            Ok(key) => {
                if !resolved.iter().any(|f| f.key == key) {
                    resolved.push(FieldSpec::for_key(key, item.label));
                }
            }
            Err(_) => unsupported.push(key_str),
        }
    }

    Some(ResolvedSchema {
        schema_source: SchemaSource::UserSchema,
        resolved_fields: order_and_cap(resolved, options.max_fields),
        unsupported_fields: unsupported,
    })
}

/// Tier 2: map form field names onto supported keys. Returns `None` when no
/// name maps, falling through to the fallback set.
fn resolve_from_form_fields(
    names: &[String],
    options: &RunOptions,
    warnings: &mut Vec<SchemaWarning>,
) -> Option<ResolvedSchema> {
    let mut matched: Vec<FieldKey> = Vec::new();

    for name in names {
        if let Some(key) = match_form_field(name, warnings) {
            if !matched.contains(&key) {
                matched.push(key);
            }
        }
    }

    if matched.is_empty() {
        return None;
    }

    let resolved = matched
        .into_iter()
        .map(|k| FieldSpec::for_key(k, None))
        .collect();

    Some(ResolvedSchema {
        schema_source: SchemaSource::FormFields,
        resolved_fields: order_and_cap(resolved, options.max_fields),
        unsupported_fields: Vec::new(),
    })
}

/// Normalize a form field name or key for containment matching: lowercase,
/// `_`/`-` to space.
fn normalize_form_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '-'], " ")
}

/// Match one form field name to a supported key.
///
/// (a) normalize; (b) containment of a supported key name is a direct match;
/// (c) else containment of aliases belonging to exactly one key is an alias
/// match; (d) aliases of two or more distinct keys is ambiguous: skipped with
/// a warning; (e) no match is skipped silently.
pub fn match_form_field(name: &str, warnings: &mut Vec<SchemaWarning>) -> Option<FieldKey> {
    let normalized = normalize_form_name(name);

    let direct: Vec<FieldKey> = FIELD_ORDER
        .iter()
        .copied()
        .filter(|k| normalized.contains(&normalize_form_name(k.as_str())))
        .collect();
    match direct.len() {
        1 => return Some(direct[0]),
        n if n > 1 => {
            warnings.push(ambiguous_warning(name, &direct));
            return None;
        }
        _ => {}
    }

    let by_alias: Vec<FieldKey> = FIELD_ORDER
        .iter()
        .copied()
        .filter(|&k| {
            field_aliases(k)
                .iter()
                .any(|alias| normalized.contains(&normalize_form_name(alias)))
        })
        .collect();
    match by_alias.len() {
        1 => Some(by_alias[0]),
        n if n > 1 => {
            warnings.push(ambiguous_warning(name, &by_alias));
            None
        }
        _ => None,
    }
}

fn ambiguous_warning(name: &str, keys: &[FieldKey]) -> SchemaWarning {
    let matched: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
    SchemaWarning::new(
        ReasonCode::AmbiguousAlias.as_str(),
        format!("form field {name:?} matches multiple keys: {matched:?}"),
    )
}

/// Tier 3: the fixed fallback field set, verbatim.
fn fallback_schema(options: &RunOptions) -> ResolvedSchema {
    ResolvedSchema {
        schema_source: SchemaSource::FallbackV1,
        resolved_fields: order_and_cap(
            FIELD_ORDER
                .iter()
                .map(|&k| FieldSpec::for_key(k, None))
                .collect(),
            options.max_fields,
        ),
        unsupported_fields: Vec::new(),
    }
}

/// Order fields by the canonical field order and cap at `max_fields`.
fn order_and_cap(fields: Vec<FieldSpec>, max_fields: usize) -> Vec<FieldSpec> {
    let mut ordered: Vec<FieldSpec> = Vec::with_capacity(fields.len());
    for key in FIELD_ORDER {
        if let Some(spec) = fields.iter().find(|f| f.key == key) {
            ordered.push(spec.clone());
        }
    }
    ordered.truncate(max_fields);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> RunOptions {
        RunOptions::default()
    }

    #[test]
    fn user_schema_wins_over_form_fields() {
        let schema_json = br#"{"fields": [{"key": "dob", "label": "Date of Birth"}]}"#;
        let form = vec!["patient_name".to_string()];
        let mut warnings = Vec::new();

        let resolved = resolve_schema(Some(schema_json), Some(&form), &opts(), &mut warnings);
        assert_eq!(resolved.schema_source, SchemaSource::UserSchema);
        assert_eq!(resolved.resolved_fields.len(), 1);
        assert_eq!(resolved.resolved_fields[0].key, FieldKey::Dob);
        assert_eq!(
            resolved.resolved_fields[0].label.as_deref(),
            Some("Date of Birth")
        );
    }

    #[test]
    fn unsupported_keys_are_reported_not_fatal() {
        let schema_json = br#"{"fields": [{"key": "ssn"}, {"key": "phone"}]}"#;
        let mut warnings = Vec::new();

        let resolved = resolve_schema(Some(schema_json), None, &opts(), &mut warnings);
        assert_eq!(resolved.schema_source, SchemaSource::UserSchema);
        assert_eq!(resolved.resolved_fields.len(), 1);
        assert_eq!(resolved.unsupported_fields, vec!["ssn".to_string()]);
    }

    #[test]
    fn fully_unsupported_user_schema_still_resolves_at_tier_one() {
        let schema_json = br#"{"fields": [{"key": "ssn"}]}"#;
        let mut warnings = Vec::new();

        let resolved = resolve_schema(Some(schema_json), None, &opts(), &mut warnings);
        assert_eq!(resolved.schema_source, SchemaSource::UserSchema);
        assert!(resolved.resolved_fields.is_empty());
        assert_eq!(resolved.unsupported_fields, vec!["ssn".to_string()]);
    }

    #[test]
    fn malformed_user_schema_falls_through_with_warning() {
        let mut warnings = Vec::new();
        let resolved = resolve_schema(Some(b"not json"), None, &opts(), &mut warnings);
        assert_eq!(resolved.schema_source, SchemaSource::FallbackV1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, "user_schema_invalid");
    }

    #[test]
    fn form_fields_map_through_aliases() {
        let form = vec![
            "Patient-Name".to_string(),
            "birthdate_field".to_string(),
            "unrelated_checkbox".to_string(),
        ];
        let mut warnings = Vec::new();

        let resolved = resolve_schema(None, Some(&form), &opts(), &mut warnings);
        assert_eq!(resolved.schema_source, SchemaSource::FormFields);
        let keys: Vec<FieldKey> = resolved.resolved_fields.iter().map(|f| f.key).collect();
        assert_eq!(keys, vec![FieldKey::FullName, FieldKey::Dob]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn ambiguous_form_field_is_skipped_with_warning() {
        // "policy" (insurance) and "allergy" aliases in one name.
        let form = vec!["policy_allergy_notes".to_string()];
        let mut warnings = Vec::new();

        let resolved = resolve_schema(None, Some(&form), &opts(), &mut warnings);
        assert_eq!(resolved.schema_source, SchemaSource::FallbackV1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, "ambiguous_alias");
    }

    #[test]
    fn absence_of_sources_falls_to_fixed_default_set() {
        let mut warnings = Vec::new();
        let resolved = resolve_schema(None, None, &opts(), &mut warnings);
        assert_eq!(resolved.schema_source, SchemaSource::FallbackV1);
        assert_eq!(resolved.resolved_fields.len(), 7);
        assert_eq!(resolved.resolved_fields[0].key, FieldKey::FullName);
    }

    #[test]
    fn max_fields_caps_in_canonical_order() {
        let mut options = opts();
        options.max_fields = 2;
        let mut warnings = Vec::new();

        let resolved = resolve_schema(None, None, &options, &mut warnings);
        let keys: Vec<FieldKey> = resolved.resolved_fields.iter().map(|f| f.key).collect();
        assert_eq!(keys, vec![FieldKey::FullName, FieldKey::Dob]);
    }
}
