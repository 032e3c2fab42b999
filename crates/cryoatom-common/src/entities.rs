//! Core types passed between the locator, selector, runner and publisher.
//! They mirror the records a single bridge run produces and consumes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Accelerator telemetry
// ---------------------------------------------------------------------------

/// One device as reported by a telemetry line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceleratorRecord {
    pub index: u32,
    pub memory_used: u64,  // bytes
    pub memory_total: u64, // bytes
    pub utilization_percent: u32,
}

// ---------------------------------------------------------------------------
// Platform job outputs
// ---------------------------------------------------------------------------

/// A single row of a job output field. `path` is `None` when the platform
/// recorded the row without a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRow {
    pub path: Option<String>,
}

impl OutputRow {
    pub fn with_path(path: impl Into<String>) -> Self {
        Self { path: Some(path.into()) }
    }

    pub fn empty() -> Self {
        Self { path: None }
    }

    /// The recorded path, if present and not blank.
    pub fn usable_path(&self) -> Option<&str> {
        self.path.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }
}

/// Recorded output fields of a platform job, keyed by field name
/// (e.g. `map_sharp/path`). Field order is the order the platform reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutputs {
    fields: Vec<(String, Vec<OutputRow>)>,
}

impl JobOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for fixtures.
    pub fn with_field(mut self, name: impl Into<String>, rows: Vec<OutputRow>) -> Self {
        self.insert(name, rows);
        self
    }

    /// Append rows to `name`, creating the field if it does not exist yet.
    pub fn insert(&mut self, name: impl Into<String>, rows: Vec<OutputRow>) {
        let name = name.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => existing.extend(rows),
            None => self.fields.push((name, rows)),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &[OutputRow])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One possible map file reference found in job metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCandidate {
    pub field_name: String,
    pub row_index: usize,
    pub path: String,
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Everything the builder needs for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub project_id: String,
    pub job_id: String,
    pub fasta_path: PathBuf,
    pub map_path: PathBuf,
    pub accelerator_index: u32,
    pub extra_args: Vec<String>,
    pub work_dir: PathBuf,
}

impl BuildRequest {
    /// Directory the builder writes its models into.
    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("out")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub output_model_path: PathBuf,
    /// `out_raw.cif`, when the builder produced one.
    pub raw_model_path: Option<PathBuf>,
    pub success: bool,
    pub log_message: String,
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

/// Copy and log-append are reported separately: the copy is the deliverable,
/// the log line is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub destination: PathBuf,
    pub copied: bool,
    pub logged: bool,
}
