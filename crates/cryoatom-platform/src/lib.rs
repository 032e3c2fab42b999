//! cryoatom-platform: everything that talks about the processing platform.
//!
//! - [`session::PlatformSession`]: the operations a run needs from CryoSPARC
//! - [`client::CryoSparcClient`]: the HTTP implementation of that trait
//! - [`locator::ArtifactLocator`]: picks the density map out of a job's outputs

pub mod locator;
pub mod session;
pub mod client;

pub use client::{ConnectionSettings, CryoSparcClient};
pub use locator::{ArtifactLocator, ExactMatcher, FieldMatcher, SubstringMatcher, DEFAULT_PRIORITIES};
pub use session::PlatformSession;
