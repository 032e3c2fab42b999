//! Mocks and fixtures shared by the workspace tests.

use async_trait::async_trait;
use cryoatom_accel::TelemetrySource;
use cryoatom_common::{CryoAtomError, JobOutputs, Result};
use cryoatom_platform::PlatformSession;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// In-memory platform. The project directory is `root`, job directories are
/// `root/<job>`.
#[derive(Debug)]
pub struct MockPlatformSession {
    root: PathBuf,
    outputs: JobOutputs,
    fail_log: bool,
    logs: Mutex<Vec<(String, String)>>,
}

impl MockPlatformSession {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            outputs: JobOutputs::new(),
            fail_log: false,
            logs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_outputs(mut self, outputs: JobOutputs) -> Self {
        self.outputs = outputs;
        self
    }

    /// Every `append_log` call fails.
    pub fn failing_log(mut self) -> Self {
        self.fail_log = true;
        self
    }

    /// `(job, message)` pairs in the order they were appended.
    pub fn logged_lines(&self) -> Vec<(String, String)> {
        self.logs.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PlatformSession for MockPlatformSession {
    async fn project_dir(&self, _project: &str) -> Result<PathBuf> {
        Ok(self.root.clone())
    }

    async fn job_dir(&self, _project: &str, job: &str) -> Result<PathBuf> {
        Ok(self.root.join(job))
    }

    async fn fetch_job_outputs(&self, project: &str, job: &str, output: &str) -> Result<JobOutputs> {
        if self.outputs.is_empty() {
            return Err(CryoAtomError::Platform(format!(
                "job {}/{} has no output '{}'",
                project, job, output
            )));
        }
        Ok(self.outputs.clone())
    }

    async fn append_log(&self, _project: &str, job: &str, message: &str) -> Result<()> {
        if self.fail_log {
            return Err(CryoAtomError::Platform("event log unavailable".to_string()));
        }
        if let Ok(mut logs) = self.logs.lock() {
            logs.push((job.to_string(), message.to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// Returns fixed telemetry text.
#[derive(Debug, Clone)]
pub struct StaticTelemetry(pub String);

impl StaticTelemetry {
    pub fn new(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

#[async_trait]
impl TelemetrySource for StaticTelemetry {
    async fn query(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Fails every query, like a host without `nvidia-smi`.
#[derive(Debug, Clone, Copy)]
pub struct UnavailableTelemetry;

#[async_trait]
impl TelemetrySource for UnavailableTelemetry {
    async fn query(&self) -> Result<String> {
        Err(CryoAtomError::NoAcceleratorAvailable(
            "telemetry command not found".to_string(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBuild {
    /// Writes `out.cif` and `out_raw.cif` into the `-o` directory.
    Success,
    /// Prints to stderr and exits 3.
    Fail,
    /// Exits 0 without writing anything.
    NoOutput,
}

/// A shell script standing in for the builder executable.
#[derive(Debug, Clone)]
pub struct FakeBuilder {
    pub executable: PathBuf,
    pub leading_args: Vec<String>,
}

const SUCCESS_SCRIPT: &str = r#"echo "$@" > args.txt
echo "$CUDA_VISIBLE_DEVICES" > device.txt
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
  esac
  shift
done
mkdir -p "$out"
printf 'data_cryoatom\n_atom_site.id 1\n' > "$out/out.cif"
printf 'data_cryoatom_raw\n' > "$out/out_raw.cif"
echo "model written to $out"
"#;

const FAIL_SCRIPT: &str = r#"echo "$@" > args.txt
echo "$CUDA_VISIBLE_DEVICES" > device.txt
echo "RuntimeError: CUDA out of memory" >&2
exit 3
"#;

const NO_OUTPUT_SCRIPT: &str = r#"echo "$@" > args.txt
echo "$CUDA_VISIBLE_DEVICES" > device.txt
exit 0
"#;

/// Write a fake builder script into `dir`. It is run through `sh`, so it
/// needs no executable bit. It records its arguments in `args.txt` and its
/// `CUDA_VISIBLE_DEVICES` in `device.txt`, both in its working directory.
pub fn fake_builder(dir: &Path, kind: FakeBuild) -> FakeBuilder {
    let body = match kind {
        FakeBuild::Success => SUCCESS_SCRIPT,
        FakeBuild::Fail => FAIL_SCRIPT,
        FakeBuild::NoOutput => NO_OUTPUT_SCRIPT,
    };
    let script = dir.join("fake_cryoatom.sh");
    std::fs::write(&script, body).expect("write fake builder script");

    FakeBuilder {
        executable: PathBuf::from("sh"),
        leading_args: vec![script.to_string_lossy().into_owned(), "build".to_string()],
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `abs` expressed relative to the current directory (`../../tmp/...`).
pub fn relative_to_cwd(abs: &Path) -> PathBuf {
    let cwd = std::env::current_dir().expect("current dir");
    let mut relative = PathBuf::new();
    for _ in cwd.components().skip(1) {
        relative.push("..");
    }
    relative.join(abs.strip_prefix("/").expect("absolute path"))
}
