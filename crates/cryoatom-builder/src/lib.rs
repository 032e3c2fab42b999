//! cryoatom-builder: runs CryoAtom against a CryoSPARC map and hands the
//! model back to the platform.
//!
//! 1. Locating the density map in the source job's outputs
//! 2. Choosing a GPU
//! 3. Staging inputs into a work directory
//! 4. Running `cryoatom build`
//! 5. Copying `out.cif` into the job directory and logging it on the job

pub mod workdir;
pub mod runner;
pub mod publisher;
pub mod pipeline;

pub use pipeline::{BridgePipeline, PipelineOptions, PipelineReport};
pub use publisher::{PublishTarget, ResultPublisher};
pub use runner::{BuilderCommand, BuilderRunner};
pub use workdir::WorkDir;

pub type Result<T> = cryoatom_common::Result<T>;
