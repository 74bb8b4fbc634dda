use std::path::PathBuf;
use thiserror::Error;

/// Failures in the optional enrichment stage. Never fatal to a run.
#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Model not loaded. Call load() first.")]
    ModelNotLoaded,

    #[error("Model artifact not found: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Invalid model artifact: {0}")]
    InvalidArtifact(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type EnrichmentResult<T> = Result<T, EnrichmentError>;
