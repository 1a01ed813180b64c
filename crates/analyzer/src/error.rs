use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalyzerError>;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("LLM analysis is disabled for this run")]
    Disabled,

    #[error("missing API credential: set {0}")]
    MissingCredential(&'static str),

    #[error("store error: {0}")]
    Store(#[from] shadowscan_store::StoreError),

    #[error("taxonomy error: {0}")]
    Classify(#[from] shadowscan_classify::ClassifyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}
