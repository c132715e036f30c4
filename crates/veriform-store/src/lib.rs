//! Run storage for Veriform
//!
//! Every pipeline run owns a directory tree:
//!
//! ```text
//! runs/<run_id>/
//!   input/
//!     request.json
//!     input_docs/
//!   artifacts/
//!   trace/
//!     trace.jsonl
//! ```
//!
//! Artifact writes are atomic (temp file + rename) and idempotent; the trace
//! log is append-only JSONL so it stays readable after a crash. The artifact
//! contract map ties each artifact name to its type, and reads re-validate
//! against the contract.

pub mod contracts;
pub mod runfs;
pub mod trace;

pub use contracts::ArtifactName;
pub use runfs::{create_run, generate_run_id, read_json, write_json_atomic, RunPaths};
pub use trace::{StepTimer, TraceErrorInfo, TraceEvent, TraceLogger, TraceStatus};

/// Storage failures. Failure to create a run's storage location is the one
/// run-fatal case; everything else surfaces per artifact.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot create run storage at {path}: {source}")]
    CreateRun {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid artifact json in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),
    #[error(transparent)]
    Contract(#[from] veriform_model::ContractError),
}
