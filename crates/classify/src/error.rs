use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClassifyError>;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid rule set: {0}")]
    InvalidRules(String),

    #[error("taxonomy artifact not found: {0}")]
    ArtifactMissing(String),

    #[error("invalid taxonomy artifact: {0}")]
    InvalidArtifact(String),

    #[error("taxonomy pinning mismatch: {0}")]
    PinningMismatch(String),

    #[error("unknown taxonomy dimension: {0}")]
    UnknownDimension(String),
}
