//! Vendor-driven ingestion: maps heterogeneous access-log rows into the
//! canonical event record. Adding a vendor is adding a mapping document,
//! not code.

mod delimited;
mod error;
mod ingestor;
mod mapping;

pub use error::{IngestError, Result};
pub use ingestor::{FileSummary, IngestOptions, IngestedFile, Ingestor};
pub use mapping::VendorMapping;
