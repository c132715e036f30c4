//! Artifact contract map: names each artifact a run produces and ties it to
//! its type. Typed readers re-validate structural contracts on load.

use serde::de::DeserializeOwned;
use serde::Serialize;
use veriform_model::{
    Candidate, DocIndexItem, FinalResult, LayoutDoc, ResolvedSchema, RoutingEntry,
};

use crate::runfs::{read_json, write_json_atomic, RunPaths};
use crate::StoreError;

/// Artifacts produced by the pipeline, in production order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactName {
    Schema,
    DocIndex,
    Layout,
    Routing,
    Candidates,
    Final,
}

impl ArtifactName {
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactName::Schema => "schema.json",
            ArtifactName::DocIndex => "doc_index.json",
            ArtifactName::Layout => "layout.json",
            ArtifactName::Routing => "routing.json",
            ArtifactName::Candidates => "candidates.json",
            ArtifactName::Final => "final.json",
        }
    }

    /// Reference string used in trace events.
    pub fn artifact_ref(&self, run_id: &str) -> String {
        format!("runs/{run_id}/artifacts/{}", self.file_name())
    }
}

/// Write an artifact atomically under its contract name.
pub fn write_artifact<T: Serialize>(
    run: &RunPaths,
    name: ArtifactName,
    value: &T,
) -> Result<(), StoreError> {
    write_json_atomic(&run.artifact_path(name.file_name()), value)
}

fn read_artifact<T: DeserializeOwned>(run: &RunPaths, name: ArtifactName) -> Result<T, StoreError> {
    read_json(&run.artifact_path(name.file_name()))
}

pub fn read_schema(run: &RunPaths) -> Result<ResolvedSchema, StoreError> {
    read_artifact(run, ArtifactName::Schema)
}

pub fn read_doc_index(run: &RunPaths) -> Result<Vec<DocIndexItem>, StoreError> {
    read_artifact(run, ArtifactName::DocIndex)
}

pub fn read_layout(run: &RunPaths) -> Result<Vec<LayoutDoc>, StoreError> {
    read_artifact(run, ArtifactName::Layout)
}

pub fn read_routing(run: &RunPaths) -> Result<Vec<RoutingEntry>, StoreError> {
    read_artifact(run, ArtifactName::Routing)
}

/// Candidates re-validate the evidence-first contract on read.
pub fn read_candidates(run: &RunPaths) -> Result<Vec<Candidate>, StoreError> {
    let candidates: Vec<Candidate> = read_artifact(run, ArtifactName::Candidates)?;
    for candidate in &candidates {
        candidate.validate()?;
    }
    Ok(candidates)
}

/// The final result re-validates every field's contract on read.
pub fn read_final(run: &RunPaths) -> Result<FinalResult, StoreError> {
    let result: FinalResult = read_artifact(run, ArtifactName::Final)?;
    for field in result.fields.values() {
        field.validate()?;
    }
    Ok(result)
}
