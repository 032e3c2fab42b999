//! Telemetry sources and the `CUDA_VISIBLE_DEVICES` restriction.

use async_trait::async_trait;
use cryoatom_common::{CryoAtomError, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

pub const DEFAULT_TELEMETRY_COMMAND: &str = "nvidia-smi";

/// Anything that can report raw per-device telemetry text.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn query(&self) -> Result<String>;
}

/// Wrapper for `nvidia-smi` execution.
pub struct NvidiaSmiSource {
    executable_path: PathBuf,
}

impl NvidiaSmiSource {
    /// Create a new NvidiaSmiSource.
    pub fn new<P: AsRef<Path>>(executable_path: P) -> Self {
        Self {
            executable_path: executable_path.as_ref().to_path_buf(),
        }
    }
}

impl Default for NvidiaSmiSource {
    fn default() -> Self {
        Self::new(DEFAULT_TELEMETRY_COMMAND)
    }
}

#[async_trait]
impl TelemetrySource for NvidiaSmiSource {
    #[instrument(skip(self), fields(exe = %self.executable_path.display()))]
    async fn query(&self) -> Result<String> {
        let output = Command::new(&self.executable_path)
            .arg("--query-gpu=index,memory.used,memory.total,utilization.gpu")
            .arg("--format=csv,noheader,nounits")
            .output()
            .await
            .map_err(|e| {
                CryoAtomError::NoAcceleratorAvailable(format!(
                    "failed to run {}: {}",
                    self.executable_path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CryoAtomError::NoAcceleratorAvailable(format!(
                "{} exited with {}: {}",
                self.executable_path.display(),
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("telemetry:\n{}", stdout.trim_end());
        Ok(stdout)
    }
}

/// Device indices a run may use. `None` means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibleDevices(Option<BTreeSet<u32>>);

impl VisibleDevices {
    pub fn all() -> Self {
        Self(None)
    }

    /// Parse a `CUDA_VISIBLE_DEVICES`-style list. Non-integer entries (UUIDs,
    /// MIG names) are ignored; if nothing parses the restriction is dropped.
    pub fn parse(value: &str) -> Self {
        let allowed: BTreeSet<u32> = value
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();

        if allowed.is_empty() {
            if !value.trim().is_empty() {
                warn!("Ignoring CUDA_VISIBLE_DEVICES={:?}: no integer indices", value);
            }
            Self(None)
        } else {
            Self(Some(allowed))
        }
    }

    /// Read `CUDA_VISIBLE_DEVICES` from the environment.
    pub fn from_env() -> Self {
        match std::env::var("CUDA_VISIBLE_DEVICES") {
            Ok(v) => Self::parse(&v),
            Err(_) => Self::all(),
        }
    }

    pub fn allows(&self, index: u32) -> bool {
        match &self.0 {
            Some(set) => set.contains(&index),
            None => true,
        }
    }
}
