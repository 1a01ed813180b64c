use thiserror::Error;

pub type Result<T> = std::result::Result<T, NormalizeError>;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Public Suffix List unavailable: {0}")]
    PslUnavailable(String),

    #[error("empty Public Suffix List snapshot: {0}")]
    PslEmpty(String),

    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    #[error("invalid normalizer config: {0}")]
    InvalidConfig(String),
}
