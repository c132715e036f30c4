//! Veriform pipeline: the evidence-constrained candidate core.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      PER-RUN PIPELINE (one pass)                     │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  schema sources ──► Resolver ──► ResolvedSchema                      │
//! │                                        │                             │
//! │  documents ───────► Router ──► RoutingEntry per field                │
//! │                                        │                             │
//! │            ┌───────────────────────────▼──────────────────────────┐  │
//! │            │ per field (independent, no cross-talk)               │  │
//! │            │   heuristic pass ──► Evidence check ──► Scorer       │  │
//! │            │        │ (no accepted / below 0.75)                  │  │
//! │            │   one model call ──► Evidence check ──► Scorer       │  │
//! │            │        │                                             │  │
//! │            │   agreement bonus ──► contradiction ──► Selector     │  │
//! │            └──────────────────────────────────────────────────────┘  │
//! │                                        │                             │
//! │  artifacts: schema / routing / candidates / final   +  trace.jsonl   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Identical inputs produce identical outputs: every accept/reject/flag
//! decision is algorithmic, there is no re-querying or iterative refinement,
//! and a field never incurs more than one heuristic pass and one model call
//! (plus one structural retry). Failures are field-scoped; the only fatal
//! conditions (zero input documents, unusable run storage) are detected
//! before per-field work begins.

pub mod engine;
pub mod evidence;
pub mod excerpts;
pub mod generate;
pub mod heuristics;
pub mod llm;
pub mod routing;
pub mod schema;
pub mod score;
pub mod select;

pub use engine::{execute_run, RunOutcome};
pub use llm::{CompletionProvider, DisabledProvider, FieldExtractor, LlmError, ScriptedProvider};

use veriform_store::StoreError;

/// Confidence at or above which a field auto-fills without the model pass
/// and, later, without review.
pub const AUTOFILL_THRESHOLD: f64 = 0.75;

/// Run-fatal pipeline failures. Field-scoped problems never surface here;
/// they become `missing`/`needs_review` statuses with rationale codes.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no input documents supplied")]
    NoInputDocuments,
}
