//! Shared record types for the shadowscan pipeline.
//!
//! Every crate in the workspace speaks these types; none of them carry any
//! behavior beyond construction, flag rendering, and canonical serialization.

pub mod canonical_json;
pub mod classification;
pub mod event;
pub mod flags;
pub mod pii;
pub mod run;
pub mod signature;
pub mod stats;

pub use classification::{
    ClassificationRecord, ClassificationSource, ErrorKind, RecordStatus, TaxonomyAssignment,
};
pub use event::{ActionTag, CanonicalEvent};
pub use flags::CandidateFlags;
pub use pii::{PiiAuditRecord, PiiKind};
pub use run::{RunRecord, RunStatus, Stage};
pub use signature::{BytesBucket, MethodGroup, UrlSignature};
pub use stats::SignatureStats;

use serde::{Deserialize, Serialize};

/// Version pins that participate in the run key. Changing any of these
/// defines a different signature/classification space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPins {
    pub signature_scheme_version: String,
    pub rule_version: String,
    pub prompt_version: String,
    pub taxonomy_version: String,
    pub taxonomy_artifact_hash: String,
    pub engine_spec_version: String,
}

impl Default for VersionPins {
    fn default() -> Self {
        Self {
            signature_scheme_version: "1.0".to_string(),
            rule_version: "1".to_string(),
            prompt_version: "1".to_string(),
            taxonomy_version: "1.0".to_string(),
            taxonomy_artifact_hash: String::new(),
            engine_spec_version: "1.5".to_string(),
        }
    }
}
