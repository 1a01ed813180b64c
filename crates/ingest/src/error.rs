use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid vendor mapping: {0}")]
    InvalidMapping(String),

    #[error("input file has no header row: {0}")]
    MissingHeader(String),

    #[error("required field {field} not found in {file}: no candidate of {candidates:?} present")]
    UnmappedField {
        field: &'static str,
        file: String,
        candidates: Vec<String>,
    },

    #[error("parse error rate {rate:.3} exceeds threshold {threshold:.3} in {file}")]
    ParseErrorRateExceeded {
        file: String,
        rate: f64,
        threshold: f64,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
