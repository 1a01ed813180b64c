//! Embedded canonical store.
//!
//! A single writer thread owns the write connection; every mutation travels
//! through the writer queue as a typed intent. Reads use separate read-only
//! connections and never contend with the writer beyond SQLite's WAL rules.

mod contract;
mod error;
mod queries;
mod schema;
mod store;
mod writer;

pub use contract::{updatable_columns, UPSERT_EXCLUDED_COLUMNS};
pub use error::{Result, StoreError};
pub use queries::{InputFileRow, Reader};
pub use store::Store;
pub use writer::{Intent, Writer, WriterHandle};
