//! cryoatom-common: shared types and errors used across all cryoatom-bridge crates.

pub mod error;
pub mod entities;

// Re-export commonly used types
pub use error::{CryoAtomError, Result};
pub use entities::{
    AcceleratorRecord, ArtifactCandidate, BuildRequest, BuildResult, JobOutputs, OutputRow,
    PublishOutcome,
};
