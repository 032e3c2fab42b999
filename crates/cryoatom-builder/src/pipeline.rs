//! Orchestrator for one bridge run.

use cryoatom_accel::{resolve_accelerator, TelemetrySource, VisibleDevices};
use cryoatom_common::{
    ArtifactCandidate, BuildRequest, BuildResult, CryoAtomError, PublishOutcome, Result,
};
use cryoatom_platform::{ArtifactLocator, PlatformSession, DEFAULT_PRIORITIES};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::publisher::{PublishTarget, ResultPublisher};
use crate::runner::BuilderRunner;
use crate::workdir::WorkDir;

/// Per-run inputs, usually straight from the command line.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub project: String,
    pub job: String,
    pub fasta: PathBuf,
    /// Output group of the source job holding the map.
    pub volume_output: String,
    /// Use exactly this field instead of the priority list.
    pub map_field: Option<String>,
    pub row_index: Option<usize>,
    /// Work directory override.
    pub out_dir: Option<PathBuf>,
    pub copy_map: bool,
    /// Manual GPU; skips telemetry.
    pub accelerator: Option<u32>,
    pub extra_args: Vec<String>,
}

impl PipelineOptions {
    pub fn new(project: &str, job: &str, fasta: impl Into<PathBuf>) -> Self {
        Self {
            project: project.to_string(),
            job: job.to_string(),
            fasta: fasta.into(),
            volume_output: "volume".to_string(),
            map_field: None,
            row_index: None,
            out_dir: None,
            copy_map: true,
            accelerator: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub accelerator_index: u32,
    pub artifact: ArtifactCandidate,
    pub map_path: PathBuf,
    pub work_dir: PathBuf,
    pub build: BuildResult,
    pub publish: PublishOutcome,
}

pub struct BridgePipeline {
    session: Arc<dyn PlatformSession>,
    telemetry: Arc<dyn TelemetrySource>,
    visible: VisibleDevices,
    runner: BuilderRunner,
    priorities: Vec<String>,
}

impl BridgePipeline {
    pub fn new(
        session: Arc<dyn PlatformSession>,
        telemetry: Arc<dyn TelemetrySource>,
        runner: BuilderRunner,
    ) -> Self {
        Self {
            session,
            telemetry,
            visible: VisibleDevices::all(),
            runner,
            priorities: DEFAULT_PRIORITIES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_visible_devices(mut self, visible: VisibleDevices) -> Self {
        self.visible = visible;
        self
    }

    /// Replace the map field priority list (case-insensitive substrings).
    pub fn with_priorities(mut self, priorities: Vec<String>) -> Self {
        self.priorities = priorities;
        self
    }

    #[instrument(skip(self, opts), fields(project = %opts.project, job = %opts.job))]
    pub async fn run(&self, opts: &PipelineOptions) -> Result<PipelineReport> {
        info!("Running CryoAtom bridge for {}/{}", opts.project, opts.job);

        // 1. Locate the map
        let project_dir = self.session.project_dir(&opts.project).await?;
        let job_dir = self.session.job_dir(&opts.project, &opts.job).await?;
        let outputs = self
            .session
            .fetch_job_outputs(&opts.project, &opts.job, &opts.volume_output)
            .await?;

        let locator = match &opts.map_field {
            Some(field) => ArtifactLocator::explicit_field(field),
            None => ArtifactLocator::from_substrings(&self.priorities),
        };
        let artifact = locator.locate(&outputs, opts.row_index)?;
        let map_path = resolve_map_path(&project_dir, &artifact.path).await?;
        info!(
            "Using map {} = {} (row {})",
            artifact.field_name,
            map_path.display(),
            artifact.row_index
        );

        // 2. Pick a GPU
        let accelerator_index =
            resolve_accelerator(opts.accelerator, self.telemetry.as_ref(), &self.visible).await?;

        // 3. Stage inputs
        let root = opts
            .out_dir
            .clone()
            .unwrap_or_else(|| WorkDir::default_root(&project_dir, &opts.project, &opts.job));
        let work = WorkDir::prepare(&root).await?;
        let fasta_path = work.stage_fasta(&opts.fasta).await?;
        let staged_map = work.stage_map(&map_path, opts.copy_map).await?;

        // 4. Build
        let request = BuildRequest {
            project_id: opts.project.clone(),
            job_id: opts.job.clone(),
            fasta_path,
            map_path: staged_map,
            accelerator_index,
            extra_args: opts.extra_args.clone(),
            work_dir: work.root().to_path_buf(),
        };
        let build = self.runner.run(&request).await?;

        // 5. Publish
        let target = PublishTarget::new(&job_dir, &opts.project, &opts.job);
        let status_line = format!(
            "CryoAtom model generated on GPU {} and copied to {}",
            accelerator_index,
            target.destination.display()
        );
        let publish = ResultPublisher::new(self.session.clone())
            .publish(&build, &target, &status_line)
            .await?;

        Ok(PipelineReport {
            accelerator_index,
            artifact,
            map_path,
            work_dir: request.work_dir,
            build,
            publish,
        })
    }
}

/// Relative paths in job metadata are relative to the project directory.
async fn resolve_map_path(project_dir: &Path, recorded: &str) -> Result<PathBuf> {
    let recorded = Path::new(recorded);
    let path = if recorded.is_absolute() {
        recorded.to_path_buf()
    } else {
        project_dir.join(recorded)
    };

    tokio::fs::canonicalize(&path).await.map_err(|e| {
        CryoAtomError::ArtifactNotFound(format!("map file {} is not readable: {}", path.display(), e))
    })
}
