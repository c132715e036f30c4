//! `veriform run`: ingest, resolve, extract, select, persist.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use veriform_ingest::ingest_dir;
use veriform_model::{FieldStatus, RunOptions};
use veriform_pipeline::llm::CompletionProvider;
use veriform_pipeline::{execute_run, DisabledProvider};
use veriform_store::{create_run, generate_run_id, write_json_atomic};

use crate::StorageArgs;

#[derive(clap::Args)]
pub struct RunArgs {
    /// Directory of source documents to extract from
    #[arg(long)]
    docs: PathBuf,

    /// User schema JSON file ({"fields": [{"key": ..., "label": ...}]})
    #[arg(long)]
    schema: Option<PathBuf>,

    /// JSON file with an array of fillable-form field names
    #[arg(long)]
    form_fields: Option<PathBuf>,

    /// Run id (generated when omitted)
    #[arg(long)]
    run_id: Option<String>,

    /// Documents routed per field
    #[arg(long, default_value_t = 3)]
    top_k: usize,

    /// Maximum number of schema fields to process
    #[arg(long, default_value_t = 7)]
    max_fields: usize,

    /// Skip the model pass even when a provider is configured
    #[arg(long)]
    no_llm: bool,

    #[command(flatten)]
    storage: StorageArgs,
}

/// Pick the completion provider: a configured backend when one is compiled
/// in and the environment names it, the disabled stand-in otherwise.
fn build_provider(no_llm: bool) -> Box<dyn CompletionProvider> {
    if no_llm {
        return Box::new(DisabledProvider);
    }

    #[cfg(any(feature = "openai", feature = "anthropic", feature = "local"))]
    {
        use veriform_pipeline::llm::providers::{provider_from_config, LlmConfig};
        match LlmConfig::from_env() {
            Ok(config) => match provider_from_config(config) {
                Ok(provider) => return provider,
                Err(e) => {
                    tracing::warn!(error = %e, "provider setup failed, continuing without model");
                }
            },
            Err(e) => {
                tracing::info!("{e}; running heuristics only");
            }
        }
    }

    Box::new(DisabledProvider)
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let schema_bytes = args
        .schema
        .as_ref()
        .map(|p| fs::read(p).with_context(|| format!("reading schema file {}", p.display())))
        .transpose()?;

    let form_fields: Option<Vec<String>> = args
        .form_fields
        .as_ref()
        .map(|p| {
            let bytes =
                fs::read(p).with_context(|| format!("reading form fields file {}", p.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("{} must be a JSON array of field names", p.display()))
        })
        .transpose()?;

    let docs = ingest_dir(&args.docs).context("document ingestion failed")?;

    let run_id = args.run_id.unwrap_or_else(generate_run_id);
    let run = create_run(&args.storage.runs_dir, &run_id).context("creating run storage")?;

    // Mirror the inputs into the run tree for auditability.
    for item in &docs.index {
        let sanitized = veriform_store::runfs::sanitize_filename(&item.filename)?;
        let src = args.docs.join(&item.filename);
        let dst = run.input_docs_dir().join(&sanitized);
        fs::copy(&src, &dst)
            .with_context(|| format!("copying {} into run storage", src.display()))?;
    }

    let options = RunOptions {
        top_k_docs: args.top_k,
        max_fields: args.max_fields,
        ..RunOptions::default()
    };
    write_json_atomic(
        &run.request_json_path(),
        &serde_json::json!({
            "run_id": run_id,
            "docs_dir": args.docs.display().to_string(),
            "options": options,
            "documents": docs.index.iter().map(|d| &d.filename).collect::<Vec<_>>(),
        }),
    )?;

    let provider = build_provider(args.no_llm);
    let outcome = execute_run(
        &run,
        &docs.index,
        &docs.layout,
        schema_bytes.as_deref(),
        form_fields.as_deref(),
        &options,
        provider.as_ref(),
    )
    .await?;

    println!("{} {}", "run".bold(), run_id);
    println!(
        "schema: {:?} ({} fields, {} unsupported)",
        outcome.schema.schema_source,
        outcome.schema.resolved_fields.len(),
        outcome.schema.unsupported_fields.len()
    );
    println!();
    print_fields(&outcome.result);

    Ok(())
}

pub(crate) fn print_fields(result: &veriform_model::FinalResult) {
    for (key, field) in &result.fields {
        let status = match field.status {
            FieldStatus::Filled => "filled".green(),
            FieldStatus::NeedsReview => "needs_review".yellow(),
            FieldStatus::Missing => "missing".red(),
        };
        let value = field.value.as_deref().unwrap_or("-");
        let rationale: Vec<&str> = field.rationale.iter().map(|r| r.as_str()).collect();
        println!(
            "{:>20}  {:<13} {:<32} conf={:.2}  [{}]",
            key.as_str().bold(),
            status,
            value,
            field.confidence,
            rationale.join(", ")
        );
    }
}
