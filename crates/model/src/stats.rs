use crate::flags::CandidateFlags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-run aggregates for one signature. Finalized before the evidence
/// emitter runs and never updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureStats {
    pub run_id: String,
    pub url_signature: String,
    pub norm_host: String,
    pub norm_path_template: String,
    pub dest_domain: String,
    pub bytes_sent_bucket: String,
    pub access_count: u64,
    pub unique_users: u64,
    pub bytes_sent_sum: u64,
    pub bytes_sent_max: u64,
    pub bytes_sent_p95: u64,
    pub bytes_received_sum: u64,
    /// Largest write-event count observed in any 5-minute window for a
    /// (user, domain) pair hitting this signature.
    pub burst_max_5min: u64,
    /// Largest per-(user, domain, UTC day) upload sum touching this signature.
    pub cumulative_user_domain_day_max: u64,
    pub flags: CandidateFlags,
    pub sampled: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}
