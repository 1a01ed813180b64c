use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("normalize error: {0}")]
    Normalize(#[from] shadowscan_normalize::NormalizeError),

    #[error("ingest error: {0}")]
    Ingest(#[from] shadowscan_ingest::IngestError),

    #[error("classify error: {0}")]
    Classify(#[from] shadowscan_classify::ClassifyError),

    #[error("store error: {0}")]
    Store(#[from] shadowscan_store::StoreError),

    #[error("analyzer error: {0}")]
    Analyzer(#[from] shadowscan_analyzer::AnalyzerError),

    #[error("evidence error: {0}")]
    Evidence(#[from] shadowscan_evidence::EvidenceError),

    #[error("run id collision: run {run_id} exists with a different run key")]
    RunKeyCollision { run_id: String },

    #[error("stage {stage} exceeded its deadline")]
    StageDeadline { stage: &'static str },

    #[error("no input files found under {0}")]
    NoInputs(String),
}
