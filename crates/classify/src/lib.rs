//! Deterministic rule-based classification and the pinned taxonomy adapter.

mod error;
mod pinning;
mod rules;
mod taxonomy;

pub use error::{ClassifyError, Result};
pub use pinning::{enforce_pinning, resolve_taxonomy_artifact, PinnedTaxonomy, ResolvedTaxonomy};
pub use rules::{Rule, RuleMatchSpec, RuleSet, RuleVerdict};
pub use taxonomy::{LegacyTaxonomy, TaxonomyAdapter, ALL_DIMENSIONS};
