//! CryoAtom execution.

use cryoatom_common::{BuildRequest, BuildResult, CryoAtomError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

pub const MODEL_NAME: &str = "out.cif";
pub const RAW_MODEL_NAME: &str = "out_raw.cif";

/// The builder only sees the chosen device, which CUDA numbers 0.
const CHILD_DEVICE_INDEX: u32 = 0;

/// How the builder executable is invoked.
#[derive(Debug, Clone)]
pub struct BuilderCommand {
    pub executable: PathBuf,
    /// Arguments placed before the per-run arguments (`build` for CryoAtom).
    pub leading_args: Vec<String>,
    /// Prepended to the device index, e.g. `cuda:` → `cuda:0`.
    pub device_prefix: String,
}

impl Default for BuilderCommand {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("cryoatom"),
            leading_args: vec!["build".to_string()],
            device_prefix: "cuda:".to_string(),
        }
    }
}

/// Wrapper for CryoAtom execution.
pub struct BuilderRunner {
    command: BuilderCommand,
}

impl BuilderRunner {
    /// Create a new BuilderRunner.
    pub fn new(command: BuilderCommand) -> Self {
        Self { command }
    }

    /// Full argument list for `request`, excluding the executable.
    pub fn arguments(&self, request: &BuildRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.command.leading_args.iter().map(OsString::from).collect();
        args.push("-s".into());
        args.push(request.fasta_path.clone().into_os_string());
        args.push("-v".into());
        args.push(request.map_path.clone().into_os_string());
        args.push("-o".into());
        args.push(request.output_dir().into_os_string());
        args.push("-d".into());
        args.push(format!("{}{}", self.command.device_prefix, CHILD_DEVICE_INDEX).into());
        args.extend(request.extra_args.iter().map(OsString::from));
        args
    }

    /// Run the builder and wait for it to exit. There is no timeout: builds
    /// can take hours.
    ///
    /// The child gets `CUDA_VISIBLE_DEVICES=<accelerator_index>` with
    /// `CUDA_DEVICE_ORDER=PCI_BUS_ID`, so the telemetry index names the same
    /// physical device and the builder addresses it as device 0.
    pub async fn run(&self, request: &BuildRequest) -> Result<BuildResult> {
        let out_dir = request.output_dir();
        remove_stale_models(&out_dir).await?;

        let args = self.arguments(request);
        info!(
            "Running {} {} on GPU {}",
            self.command.executable.display(),
            args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" "),
            request.accelerator_index
        );

        let output = Command::new(&self.command.executable)
            .args(&args)
            .current_dir(&request.work_dir)
            .env("CUDA_DEVICE_ORDER", "PCI_BUS_ID")
            .env("CUDA_VISIBLE_DEVICES", request.accelerator_index.to_string())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CryoAtomError::BuildProcessFailed {
                code: None,
                stderr: format!("failed to start {}: {}", self.command.executable.display(), e),
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(target: "cryoatom_builder::stdout", "{}", line);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            debug!(target: "cryoatom_builder::stderr", "{}", line);
        }

        if !output.status.success() {
            return Err(CryoAtomError::BuildProcessFailed {
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        let model = out_dir.join(MODEL_NAME);
        if !tokio::fs::try_exists(&model).await.unwrap_or(false) {
            return Err(CryoAtomError::ModelNotFound(model));
        }
        let raw = out_dir.join(RAW_MODEL_NAME);
        let raw_model_path = tokio::fs::try_exists(&raw).await.unwrap_or(false).then_some(raw);

        info!("CryoAtom finished. Model: {}", model.display());
        match &raw_model_path {
            Some(raw) => info!("Raw model (unfiltered by sequence): {}", raw.display()),
            None => debug!("No raw model produced"),
        }

        Ok(BuildResult {
            log_message: format!(
                "CryoAtom model built on GPU {} at {}",
                request.accelerator_index,
                model.display()
            ),
            output_model_path: model,
            raw_model_path,
            success: true,
        })
    }
}

/// Models left by an earlier run in a reused work directory must not be
/// mistaken for this run's output.
async fn remove_stale_models(out_dir: &Path) -> Result<()> {
    for name in [MODEL_NAME, RAW_MODEL_NAME] {
        let path = out_dir.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed stale {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryoatom_test_utils::{fake_builder, FakeBuild};
    use pretty_assertions::assert_eq;

    fn fake_runner(dir: &Path, kind: FakeBuild) -> BuilderRunner {
        let fake = fake_builder(dir, kind);
        BuilderRunner::new(BuilderCommand {
            executable: fake.executable,
            leading_args: fake.leading_args,
            ..BuilderCommand::default()
        })
    }

    fn request(work_dir: &Path) -> BuildRequest {
        BuildRequest {
            project_id: "P1".to_string(),
            job_id: "J2".to_string(),
            fasta_path: work_dir.join("input.fasta"),
            map_path: work_dir.join("input_map.mrc"),
            accelerator_index: 1,
            extra_args: vec!["--keep-intermediates".to_string()],
            work_dir: work_dir.to_path_buf(),
        }
    }

    #[test]
    fn test_arguments_order() {
        let runner = BuilderRunner::new(BuilderCommand::default());
        let req = request(Path::new("/w"));
        let args: Vec<String> = runner
            .arguments(&req)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "build", "-s", "/w/input.fasta", "-v", "/w/input_map.mrc", "-o", "/w/out", "-d",
                "cuda:0", "--keep-intermediates",
            ]
        );
    }

    #[tokio::test]
    async fn test_successful_build_reports_models() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("out")).unwrap();
        let runner = fake_runner(tmp.path(), FakeBuild::Success);

        let result = runner.run(&request(tmp.path())).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output_model_path, tmp.path().join("out").join(MODEL_NAME));
        assert_eq!(result.raw_model_path, Some(tmp.path().join("out").join(RAW_MODEL_NAME)));

        // runs in the work dir and forwards extra args
        let args = std::fs::read_to_string(tmp.path().join("args.txt")).unwrap();
        assert!(args.contains("-d cuda:0"));
        assert!(args.trim_end().ends_with("--keep-intermediates"));
    }

    #[tokio::test]
    async fn test_child_sees_only_the_chosen_device() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = fake_runner(tmp.path(), FakeBuild::Success);
        let mut req = request(tmp.path());
        req.accelerator_index = 3;

        runner.run(&req).await.unwrap();
        let device = std::fs::read_to_string(tmp.path().join("device.txt")).unwrap();
        assert_eq!(device.trim(), "3");
    }

    #[tokio::test]
    async fn test_stale_model_from_earlier_run_is_not_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join(MODEL_NAME), "data_old\n").unwrap();
        std::fs::write(out.join(RAW_MODEL_NAME), "data_old_raw\n").unwrap();

        let runner = fake_runner(tmp.path(), FakeBuild::NoOutput);
        let err = runner.run(&request(tmp.path())).await.unwrap_err();
        assert!(matches!(err, CryoAtomError::ModelNotFound(_)));
        assert!(!out.join(RAW_MODEL_NAME).exists());
    }

    #[tokio::test]
    async fn test_failed_build_carries_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = fake_runner(tmp.path(), FakeBuild::Fail);

        let err = runner.run(&request(tmp.path())).await.unwrap_err();
        match err {
            CryoAtomError::BuildProcessFailed { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("CUDA out of memory"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clean_exit_without_model_is_model_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = fake_runner(tmp.path(), FakeBuild::NoOutput);

        let err = runner.run(&request(tmp.path())).await.unwrap_err();
        assert!(matches!(err, CryoAtomError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_executable_is_build_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = BuilderRunner::new(BuilderCommand {
            executable: PathBuf::from("/nonexistent/cryoatom"),
            ..BuilderCommand::default()
        });
        let err = runner.run(&request(tmp.path())).await.unwrap_err();
        assert!(matches!(err, CryoAtomError::BuildProcessFailed { code: None, .. }));
    }
}
