//! Error types for the fallible edges of the system.
//!
//! The confidence core itself is total; only parsing, storage and the
//! surrounding pipeline can fail.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("layout result has no pages array")]
    MissingPages,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    RecordNotFound(String),
    #[error("blob not found: {0}")]
    BlobNotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown profile: {0}")]
    UnknownProfile(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("layout analysis failed: {0:#}")]
    Ocr(anyhow::Error),
    #[error("structured extraction failed: {0:#}")]
    Llm(anyhow::Error),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
