//! Pipeline error types.

use speech_client::SynthesisError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid settings, reported before any work starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Could not decode {path}: tried {tried}")]
    Decoding { path: PathBuf, tried: String },

    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("EPUB error: {0}")]
    Epub(String),

    #[error("{0} is claimed by another run")]
    AlreadyClaimed(String),

    #[error("Unit {unit} is missing chunks {missing:?}")]
    ReassemblyGap { unit: usize, missing: Vec<usize> },

    #[error("Synthesis task failed: {0}")]
    Task(String),

    #[error("Marker store error: {0}")]
    Marker(String),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
