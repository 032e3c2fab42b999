use async_trait::async_trait;
use cryoatom_common::{JobOutputs, Result};
use std::path::PathBuf;

/// The platform operations a bridge run depends on.
///
/// Project and job identifiers are platform UIDs such as `P164` / `J44`.
#[async_trait]
pub trait PlatformSession: Send + Sync {
    /// Absolute path of the project directory.
    async fn project_dir(&self, project: &str) -> Result<PathBuf>;

    /// Absolute path of the job directory.
    async fn job_dir(&self, project: &str, job: &str) -> Result<PathBuf>;

    /// Recorded fields of the job output named `output` (e.g. `volume`).
    async fn fetch_job_outputs(&self, project: &str, job: &str, output: &str) -> Result<JobOutputs>;

    /// Append one line to the job's event log.
    async fn append_log(&self, project: &str, job: &str, message: &str) -> Result<()>;
}
