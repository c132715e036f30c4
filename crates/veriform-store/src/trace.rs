//! Append-only trace logging.
//!
//! One JSON object per line in `trace/trace.jsonl`. Appends are flushed per
//! event so the log survives a crashed process up to the last completed step.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::runfs::RunPaths;
use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Ok,
    Warn,
    Error,
}

/// Error details attached to a failed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceErrorInfo {
    pub kind: String,
    pub message: String,
}

/// A single trace event. Field order is the wire order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub ts: String,
    pub run_id: String,
    pub step: String,
    pub status: TraceStatus,
    pub duration_ms: u64,
    #[serde(default)]
    pub inputs_ref: Vec<String>,
    #[serde(default)]
    pub outputs_ref: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TraceErrorInfo>,
}

/// Append-only trace logger for one run.
#[derive(Debug, Clone)]
pub struct TraceLogger {
    path: PathBuf,
    run_id: String,
}

impl TraceLogger {
    pub fn new(run: &RunPaths) -> Self {
        Self {
            path: run.trace_jsonl_path(),
            run_id: run.run_id().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one event as a single JSON line.
    pub fn append(&self, event: &TraceEvent) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let line = serde_json::to_string(event).map_err(|source| StoreError::Json {
            path: self.path.display().to_string(),
            source,
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| StoreError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        writeln!(file, "{line}").map_err(|source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// Record an untimed warning attached to a step, with the detail carried
    /// in the event's error slot.
    pub fn warn(&self, step: &str, kind: &str, message: &str) -> Result<(), StoreError> {
        self.append(&TraceEvent {
            ts: utc_iso_timestamp(),
            run_id: self.run_id.clone(),
            step: step.to_string(),
            status: TraceStatus::Warn,
            duration_ms: 0,
            inputs_ref: Vec::new(),
            outputs_ref: Vec::new(),
            error: Some(TraceErrorInfo {
                kind: kind.to_string(),
                message: message.to_string(),
            }),
        })
    }

    /// Start a timed step. The returned timer records duration and writes the
    /// event when finished.
    pub fn step(&self, step: &str) -> StepTimer<'_> {
        StepTimer {
            logger: self,
            step: step.to_string(),
            inputs_ref: Vec::new(),
            outputs_ref: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Read all events back, skipping unparseable lines.
    pub fn read_events(&self) -> Result<Vec<TraceEvent>, StoreError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

/// Timing guard for one pipeline step.
pub struct StepTimer<'a> {
    logger: &'a TraceLogger,
    step: String,
    inputs_ref: Vec<String>,
    outputs_ref: Vec<String>,
    started: Instant,
}

impl StepTimer<'_> {
    pub fn inputs(mut self, refs: &[String]) -> Self {
        self.inputs_ref = refs.to_vec();
        self
    }

    pub fn outputs(mut self, refs: &[String]) -> Self {
        self.outputs_ref = refs.to_vec();
        self
    }

    pub fn finish(self, status: TraceStatus) -> Result<(), StoreError> {
        self.finish_with(status, None)
    }

    pub fn finish_error(self, kind: &str, message: &str) -> Result<(), StoreError> {
        let error = TraceErrorInfo {
            kind: kind.to_string(),
            message: message.to_string(),
        };
        self.finish_with(TraceStatus::Error, Some(error))
    }

    fn finish_with(
        self,
        status: TraceStatus,
        error: Option<TraceErrorInfo>,
    ) -> Result<(), StoreError> {
        let event = TraceEvent {
            ts: utc_iso_timestamp(),
            run_id: self.logger.run_id.clone(),
            step: self.step,
            status,
            duration_ms: self.started.elapsed().as_millis() as u64,
            inputs_ref: self.inputs_ref,
            outputs_ref: self.outputs_ref,
            error,
        };
        self.logger.append(&event)
    }
}

/// UTC ISO-8601 timestamp with microsecond precision and `Z` suffix.
pub fn utc_iso_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runfs::create_run;

    #[test]
    fn events_append_as_jsonl() {
        let base = tempfile::tempdir().unwrap();
        let run = create_run(base.path(), "run_trace").unwrap();
        let logger = TraceLogger::new(&run);

        logger.step("resolve_schema").finish(TraceStatus::Ok).unwrap();
        logger
            .step("route_docs")
            .inputs(&["artifacts/schema.json".to_string()])
            .finish(TraceStatus::Warn)
            .unwrap();
        logger
            .step("field:dob:llm")
            .finish_error("llm_invalid_json", "malformed after retry")
            .unwrap();

        let events = logger.read_events().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].step, "resolve_schema");
        assert_eq!(events[1].status, TraceStatus::Warn);
        assert_eq!(events[2].error.as_ref().unwrap().kind, "llm_invalid_json");
        assert_eq!(events[2].run_id, "run_trace");
    }

    #[test]
    fn earlier_events_survive_later_appends() {
        let base = tempfile::tempdir().unwrap();
        let run = create_run(base.path(), "run_append").unwrap();
        let logger = TraceLogger::new(&run);

        for i in 0..5 {
            logger.step(&format!("step_{i}")).finish(TraceStatus::Ok).unwrap();
        }
        let events = logger.read_events().unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].step, "step_0");
        assert_eq!(events[4].step, "step_4");
    }
}
