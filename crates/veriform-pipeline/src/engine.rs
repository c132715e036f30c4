//! Per-run orchestration: resolve, route, generate, select, persist.
//!
//! Fields are processed independently in canonical order; nothing a field
//! computes is visible to another field. The run is done only when every
//! resolved field has reached a terminal status, and the only fatal exits
//! are the pre-pipeline ones (no input documents, unusable storage).

use std::collections::BTreeMap;

use veriform_model::{
    Candidate, DocIndexItem, FinalField, FinalResult, LayoutDoc, ResolvedSchema, RoutingEntry,
    RunOptions,
};
use veriform_store::contracts::{self, ArtifactName};
use veriform_store::{RunPaths, TraceLogger, TraceStatus};

use crate::generate::generate_for_field;
use crate::llm::CompletionProvider;
use crate::routing::route_docs;
use crate::schema::resolve_schema;
use crate::score::apply_agreement_bonus;
use crate::select::{select_field, SelectionContext};
use crate::PipelineError;

/// Everything a completed run produced, mirrored in the artifacts on disk.
#[derive(Debug)]
pub struct RunOutcome {
    pub schema: ResolvedSchema,
    pub routing: Vec<RoutingEntry>,
    pub candidates: Vec<Candidate>,
    pub result: FinalResult,
}

/// Execute the full pipeline for one run.
pub async fn execute_run(
    run: &RunPaths,
    doc_index: &[DocIndexItem],
    layout: &[LayoutDoc],
    user_schema_json: Option<&[u8]>,
    form_fields: Option<&[String]>,
    options: &RunOptions,
    provider: &dyn CompletionProvider,
) -> Result<RunOutcome, PipelineError> {
    if doc_index.is_empty() {
        return Err(PipelineError::NoInputDocuments);
    }

    let trace = TraceLogger::new(run);
    let run_id = run.run_id().to_string();

    contracts::write_artifact(run, ArtifactName::DocIndex, &doc_index)?;
    contracts::write_artifact(run, ArtifactName::Layout, &layout)?;

    // --- Schema resolution ---
    let step = trace
        .step("resolve_schema")
        .outputs(&[ArtifactName::Schema.artifact_ref(&run_id)]);
    let mut warnings = Vec::new();
    let schema = resolve_schema(user_schema_json, form_fields, options, &mut warnings);
    contracts::write_artifact(run, ArtifactName::Schema, &schema)?;
    step.finish(TraceStatus::Ok)?;
    for warning in &warnings {
        trace.warn("resolve_schema", warning.kind, &warning.message)?;
    }
    tracing::info!(
        source = ?schema.schema_source,
        fields = schema.resolved_fields.len(),
        unsupported = schema.unsupported_fields.len(),
        "schema resolved"
    );

    // --- Routing ---
    let any_readable = doc_index.iter().any(|d| d.is_readable());
    let step = trace
        .step("route_docs")
        .inputs(&[
            ArtifactName::Schema.artifact_ref(&run_id),
            ArtifactName::DocIndex.artifact_ref(&run_id),
            ArtifactName::Layout.artifact_ref(&run_id),
        ])
        .outputs(&[ArtifactName::Routing.artifact_ref(&run_id)]);
    let routing = route_docs(&schema, doc_index, layout, options.top_k_docs);
    contracts::write_artifact(run, ArtifactName::Routing, &routing)?;
    step.finish(if any_readable {
        TraceStatus::Ok
    } else {
        TraceStatus::Warn
    })?;

    let layout_by_id: BTreeMap<&str, &LayoutDoc> =
        layout.iter().map(|d| (d.doc_id.as_str(), d)).collect();
    let routing_by_field: BTreeMap<_, _> = routing.iter().map(|r| (r.field, r)).collect();
    let all_docs_unreadable = !doc_index.is_empty() && !any_readable;

    // --- Per-field generation and selection ---
    let batch_step = trace.step("extract_candidates").inputs(&[
        ArtifactName::Schema.artifact_ref(&run_id),
        ArtifactName::Layout.artifact_ref(&run_id),
        ArtifactName::Routing.artifact_ref(&run_id),
    ]);

    let mut all_candidates: Vec<Candidate> = Vec::new();
    let mut final_fields: BTreeMap<_, FinalField> = BTreeMap::new();

    for field in schema.resolved_fields.iter().take(options.max_fields) {
        let entry = routing_by_field.get(&field.key);
        let routed_docs: Vec<&LayoutDoc> = entry
            .map(|e| {
                e.doc_ids
                    .iter()
                    .filter_map(|id| layout_by_id.get(id.as_str()).copied())
                    .collect()
            })
            .unwrap_or_default();
        let empty_scores = BTreeMap::new();
        let routing_scores = entry.map(|e| &e.scores).unwrap_or(&empty_scores);

        let gen_step = trace.step(&format!("field:{}:generate", field.key));
        let mut outcome =
            generate_for_field(field, &routed_docs, routing_scores, options, provider).await;
        match outcome.llm_failure {
            Some(code) => {
                gen_step.finish_error(code.as_str(), "model attempt failed for this field")?
            }
            None => gen_step.finish(TraceStatus::Ok)?,
        }

        apply_agreement_bonus(&mut outcome.candidates);

        let ctx = SelectionContext {
            no_readable_docs: routed_docs.is_empty(),
            all_docs_unreadable,
            llm_failure: outcome.llm_failure,
        };
        let select_step = trace.step(&format!("field:{}:select", field.key));
        let final_field = select_field(field, outcome.candidates.clone(), &ctx);
        select_step.finish(TraceStatus::Ok)?;

        tracing::debug!(
            field = %field.key,
            status = ?final_field.status,
            confidence = final_field.confidence,
            candidates = outcome.candidates.len(),
            "field selected"
        );

        all_candidates.extend(outcome.candidates);
        final_fields.insert(field.key, final_field);
    }

    // Deterministic artifact order: field ascending, then confidence
    // descending.
    all_candidates.sort_by(|a, b| {
        a.field.cmp(&b.field).then(
            b.scores
                .final_confidence()
                .total_cmp(&a.scores.final_confidence()),
        )
    });
    contracts::write_artifact(run, ArtifactName::Candidates, &all_candidates)?;
    batch_step
        .outputs(&[ArtifactName::Candidates.artifact_ref(&run_id)])
        .finish(TraceStatus::Ok)?;

    let result = FinalResult {
        run_id: run_id.clone(),
        schema_source: schema.schema_source,
        fields: final_fields,
    };
    let step = trace
        .step("select_fields")
        .inputs(&[ArtifactName::Candidates.artifact_ref(&run_id)])
        .outputs(&[ArtifactName::Final.artifact_ref(&run_id)]);
    contracts::write_artifact(run, ArtifactName::Final, &result)?;
    step.finish(TraceStatus::Ok)?;

    Ok(RunOutcome {
        schema,
        routing,
        candidates: all_candidates,
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::evidence_supports_value;
    use crate::llm::{DisabledProvider, ScriptedProvider};
    use veriform_model::{FieldKey, FieldStatus, LayoutPage, ReasonCode, UnreadableReason};
    use veriform_store::create_run;

    fn readable_doc(doc_id: &str, text: &str) -> (DocIndexItem, LayoutDoc) {
        (
            DocIndexItem {
                doc_id: doc_id.to_string(),
                filename: format!("{doc_id}.txt"),
                mime_type: "text/plain".to_string(),
                pages: Some(1),
                has_text_layer: true,
                unreadable_reason: None,
                sha256: "0".repeat(64),
            },
            LayoutDoc {
                doc_id: doc_id.to_string(),
                pages: vec![LayoutPage {
                    page: 1,
                    full_text: text.to_string(),
                    spans: vec![],
                }],
            },
        )
    }

    fn unreadable_doc(doc_id: &str) -> DocIndexItem {
        DocIndexItem {
            doc_id: doc_id.to_string(),
            filename: format!("{doc_id}.pdf"),
            mime_type: "application/pdf".to_string(),
            pages: None,
            has_text_layer: false,
            unreadable_reason: Some(UnreadableReason::NoTextLayer),
            sha256: "0".repeat(64),
        }
    }

    #[tokio::test]
    async fn zero_input_documents_is_fatal() {
        let base = tempfile::tempdir().unwrap();
        let run = create_run(base.path(), "run_empty").unwrap();
        let err = execute_run(
            &run,
            &[],
            &[],
            None,
            None,
            &RunOptions::default(),
            &DisabledProvider,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::NoInputDocuments));
    }

    #[tokio::test]
    async fn unreadable_only_input_resolves_every_field_missing() {
        let base = tempfile::tempdir().unwrap();
        let run = create_run(base.path(), "run_unreadable").unwrap();
        let index = vec![unreadable_doc("doc_001")];

        let outcome = execute_run(
            &run,
            &index,
            &[],
            None,
            None,
            &RunOptions::default(),
            &DisabledProvider,
        )
        .await
        .unwrap();

        assert_eq!(outcome.result.fields.len(), 7);
        for field in outcome.result.fields.values() {
            assert_eq!(field.status, FieldStatus::Missing);
            assert!(field.rationale.contains(&ReasonCode::NoReadableDocs));
            assert!(field.value.is_none());
        }
        // Routing warned, and every entry is empty.
        assert!(outcome.routing.iter().all(|r| r.doc_ids.is_empty()));
    }

    #[tokio::test]
    async fn full_run_fills_anchored_fields_and_persists_artifacts() {
        let base = tempfile::tempdir().unwrap();
        let run = create_run(base.path(), "run_full").unwrap();

        let (i1, l1) = readable_doc(
            "doc_001",
            "Patient Name: John A. Smith\nDOB: 1980-01-01\nPhone: +1 555 123 4567\n\
             Address: 12 Oak Street, Springfield\nMember ID: ABC123456\n\
             Allergies: Penicillin\nMedications: Lisinopril",
        );
        let provider = ScriptedProvider::new();

        let outcome = execute_run(
            &run,
            &[i1],
            &[l1],
            None,
            None,
            &RunOptions::default(),
            &provider,
        )
        .await
        .unwrap();

        let dob = &outcome.result.fields[&FieldKey::Dob];
        assert_eq!(dob.status, FieldStatus::Filled);
        assert_eq!(dob.normalized_value.as_deref(), Some("1980-01-01"));

        // Evidence-first invariant: every non-null value survives the check.
        for field in outcome.result.fields.values() {
            if field.value.is_some() {
                assert!(!field.evidence.is_empty());
            }
        }
        for candidate in &outcome.candidates {
            if candidate.is_accepted() {
                let spec = veriform_model::FieldSpec::for_key(candidate.field, None);
                assert!(evidence_supports_value(spec.field_type, candidate));
            }
        }

        // Artifacts all exist and re-validate.
        assert!(contracts::read_schema(&run).is_ok());
        assert!(contracts::read_routing(&run).is_ok());
        assert!(contracts::read_candidates(&run).is_ok());
        assert!(contracts::read_final(&run).is_ok());
    }

    #[tokio::test]
    async fn identical_inputs_produce_identical_results() {
        let (i1, l1) = readable_doc("doc_001", "DOB: 1980-01-01\nPhone: 555-123-4567");
        let options = RunOptions::default();

        let base_a = tempfile::tempdir().unwrap();
        let run_a = create_run(base_a.path(), "run_same").unwrap();
        let a = execute_run(
            &run_a,
            std::slice::from_ref(&i1),
            std::slice::from_ref(&l1),
            None,
            None,
            &options,
            &DisabledProvider,
        )
        .await
        .unwrap();

        let base_b = tempfile::tempdir().unwrap();
        let run_b = create_run(base_b.path(), "run_same").unwrap();
        let b = execute_run(
            &run_b,
            std::slice::from_ref(&i1),
            std::slice::from_ref(&l1),
            None,
            None,
            &options,
            &DisabledProvider,
        )
        .await
        .unwrap();

        for (key, field_a) in &a.result.fields {
            let field_b = &b.result.fields[key];
            assert_eq!(field_a.status, field_b.status);
            assert_eq!(field_a.value, field_b.value);
            assert_eq!(field_a.confidence, field_b.confidence);
            assert_eq!(field_a.rationale, field_b.rationale);
        }
        assert_eq!(a.candidates.len(), b.candidates.len());
    }
}
