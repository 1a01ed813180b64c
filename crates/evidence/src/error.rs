use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvidenceError>;

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bundle validation failed: {0}")]
    ValidationFailed(String),
}
