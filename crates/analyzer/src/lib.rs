//! Batched LLM classification of residual signatures.
//!
//! Everything that leaves the process goes through [`payload`], which only
//! ever sees signatures, normalized hosts, path templates, and aggregate
//! statistics. User identifiers, source addresses, and raw URLs are not
//! representable in the payload types.

mod analyzer;
mod budget;
mod client;
mod error;
mod payload;
mod response;

pub use analyzer::{AnalyzerConfig, AnalyzerOutcome, LlmAnalyzer};
pub use budget::BudgetBucket;
pub use client::{ClientError, HttpLlmClient, LlmTransport, TransportResponse};
pub use error::{AnalyzerError, Result};
pub use payload::{BatchPayload, PayloadItem};
pub use response::{parse_and_validate, ResponseItem, ResponseTaxonomy, ValidatedItem};
