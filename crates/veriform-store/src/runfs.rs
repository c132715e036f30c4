//! Run directory management and atomic JSON writes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::StoreError;

/// Paths for one run's storage tree.
#[derive(Debug, Clone)]
pub struct RunPaths {
    base_dir: PathBuf,
    run_id: String,
}

impl RunPaths {
    pub fn new(base_dir: &Path, run_id: &str) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            run_id: run_id.to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> PathBuf {
        self.base_dir.join(&self.run_id)
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root().join("input")
    }

    pub fn input_docs_dir(&self) -> PathBuf {
        self.input_dir().join("input_docs")
    }

    pub fn request_json_path(&self) -> PathBuf {
        self.input_dir().join("request.json")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root().join("artifacts")
    }

    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.artifacts_dir().join(file_name)
    }

    pub fn trace_dir(&self) -> PathBuf {
        self.root().join("trace")
    }

    pub fn trace_jsonl_path(&self) -> PathBuf {
        self.trace_dir().join("trace.jsonl")
    }
}

/// Generate a filesystem-safe run id: UTC timestamp plus a random suffix,
/// e.g. `2025-12-12T11-32-01Z_ab12cd34`.
pub fn generate_run_id() -> String {
    let ts = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%SZ");
    let suffix: String = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    format!("{ts}_{suffix}")
}

/// Create the run directory tree. Failure here is run-fatal: the pipeline is
/// never entered without a storage location.
pub fn create_run(base_dir: &Path, run_id: &str) -> Result<RunPaths, StoreError> {
    let paths = RunPaths::new(base_dir, run_id);
    for dir in [
        paths.input_docs_dir(),
        paths.artifacts_dir(),
        paths.trace_dir(),
    ] {
        fs::create_dir_all(&dir).map_err(|source| StoreError::CreateRun {
            path: dir.display().to_string(),
            source,
        })?;
    }
    tracing::debug!(run_id = %run_id, root = %paths.root().display(), "created run storage");
    Ok(paths)
}

/// Sanitize an input filename: strip directory components, reject empty and
/// dot-only names, replace characters that are unsafe on common filesystems.
pub fn sanitize_filename(filename: &str) -> Result<String, StoreError> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base.chars().all(|c| c == '.') {
        return Err(StoreError::InvalidFilename(filename.to_string()));
    }

    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    Ok(sanitized)
}

/// Write a value as pretty JSON via a temp file in the same directory,
/// then rename over the target. Re-running a step overwrites its artifact
/// with identical content, so writes are idempotent.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|source| StoreError::Io {
        path: parent.display().to_string(),
        source,
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|source| StoreError::Io {
        path: parent.display().to_string(),
        source,
    })?;

    let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })?;
    tmp.write_all(&json).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    tmp.write_all(b"\n").map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;

    tmp.persist(path).map_err(|e| StoreError::Io {
        path: path.display().to_string(),
        source: e.error,
    })?;

    Ok(())
}

/// Read and deserialize a JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })
}
