//! Per-run working directory.
//!
//! ```text
//! <root>/
//!   input.fasta
//!   input_map.mrc   (unless map copying is disabled)
//!   out/            (builder output)
//! ```

use cryoatom_common::{CryoAtomError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

pub const FASTA_NAME: &str = "input.fasta";
pub const MAP_NAME: &str = "input_map.mrc";
pub const OUT_DIR_NAME: &str = "out";

#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Default location: `<project_dir>/cryoatom_<project>_<job>`.
    pub fn default_root(project_dir: &Path, project: &str, job: &str) -> PathBuf {
        project_dir.join(format!("cryoatom_{}_{}", project, job))
    }

    /// Create `root` and its `out/` subdirectory. A relative `root` is made
    /// absolute against the current directory, since the builder runs with
    /// the work directory as its cwd.
    pub async fn prepare<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())?;
        fs::create_dir_all(root.join(OUT_DIR_NAME)).await?;
        info!("CryoAtom work directory: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy the sequence file in as `input.fasta`.
    pub async fn stage_fasta(&self, fasta: &Path) -> Result<PathBuf> {
        if !fs::try_exists(fasta).await.unwrap_or(false) {
            return Err(CryoAtomError::InvalidInput(format!(
                "FASTA file not found: {}",
                fasta.display()
            )));
        }
        let dest = self.root.join(FASTA_NAME);
        fs::copy(fasta, &dest).await?;
        debug!("Copied FASTA to {}", dest.display());
        Ok(dest)
    }

    /// Copy the map in as `input_map.mrc`, or use it in place when `copy` is false.
    pub async fn stage_map(&self, map: &Path, copy: bool) -> Result<PathBuf> {
        if !copy {
            debug!("Using map in place: {}", map.display());
            return Ok(map.to_path_buf());
        }
        let dest = self.root.join(MAP_NAME);
        fs::copy(map, &dest).await?;
        debug!("Copied map to {}", dest.display());
        Ok(dest)
    }
}
