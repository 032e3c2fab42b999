//! Copies the built model into the source job directory and notes it on the
//! job's event log.

use cryoatom_common::{BuildResult, CryoAtomError, PublishOutcome, Result};
use cryoatom_platform::PlatformSession;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

/// Where a model is published and which job log is annotated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub project: String,
    pub job: String,
    pub destination: PathBuf,
}

impl PublishTarget {
    /// `<job_dir>/cryoatom/<project>_<job>_cryoatom.cif`
    pub fn new(job_dir: &Path, project: &str, job: &str) -> Self {
        Self {
            project: project.to_string(),
            job: job.to_string(),
            destination: job_dir
                .join("cryoatom")
                .join(format!("{}_{}_cryoatom.cif", project, job)),
        }
    }
}

pub struct ResultPublisher {
    session: Arc<dyn PlatformSession>,
}

impl ResultPublisher {
    pub fn new(session: Arc<dyn PlatformSession>) -> Self {
        Self { session }
    }

    /// Copy the model, then append `status_line` to the job log. Only the copy
    /// can fail the call; a failed log append is reported as `logged: false`.
    pub async fn publish(
        &self,
        result: &BuildResult,
        target: &PublishTarget,
        status_line: &str,
    ) -> Result<PublishOutcome> {
        if !result.success {
            return Err(CryoAtomError::Publish(format!(
                "build did not succeed, nothing to publish ({})",
                result.log_message
            )));
        }

        if let Some(parent) = target.destination.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                CryoAtomError::Publish(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        fs::copy(&result.output_model_path, &target.destination)
            .await
            .map_err(|e| {
                CryoAtomError::Publish(format!(
                    "cannot copy {} to {}: {}",
                    result.output_model_path.display(),
                    target.destination.display(),
                    e
                ))
            })?;
        info!("Copied model to {}", target.destination.display());

        let logged = match self
            .session
            .append_log(&target.project, &target.job, status_line)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Could not write to the log of {}/{} (model is still in place): {}",
                    target.project, target.job, e
                );
                false
            }
        };

        Ok(PublishOutcome {
            destination: target.destination.clone(),
            copied: true,
            logged,
        })
    }
}
