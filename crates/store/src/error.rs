use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("writer queue is closed")]
    WriterClosed,

    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}
