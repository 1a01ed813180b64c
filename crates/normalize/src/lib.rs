//! URL canonicalization and signature derivation.
//!
//! Normalization is a pure function of (input, config): the step order is
//! contractual because reordering changes signatures, and signatures key the
//! long-lived classification cache.

mod canonicalizer;
mod config;
mod error;
mod psl;
mod punycode;
mod signature;

pub use canonicalizer::{CanonicalUrl, Canonicalizer, PiiDetection};
pub use config::{BytesBucketThresholds, NormalizerConfig};
pub use error::{NormalizeError, Result};
pub use psl::PublicSuffixList;
pub use signature::{SignatureBuilder, SignatureInput};
