use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryoAtomError {
    #[error("Malformed telemetry line {line:?}: {reason}")]
    Parse { line: String, reason: String },

    #[error("No accelerator available: {0}")]
    NoAcceleratorAvailable(String),

    #[error("No map artifact found: {0}")]
    ArtifactNotFound(String),

    #[error("Builder exited with code {code:?}: {stderr}")]
    BuildProcessFailed { code: Option<i32>, stderr: String },

    #[error("Builder finished but produced no model at {0}")]
    ModelNotFound(PathBuf),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CryoAtomError>;
