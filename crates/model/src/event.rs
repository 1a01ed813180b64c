use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the source device did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    Allow,
    Block,
    Warn,
    Observe,
}

impl ActionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionTag::Allow => "allow",
            ActionTag::Block => "block",
            ActionTag::Warn => "warn",
            ActionTag::Observe => "observe",
        }
    }
}

/// One normalized request line. Created once per input row and immutable
/// thereafter; the run working area owns the lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub event_time: DateTime<Utc>,
    pub vendor: String,
    /// Opaque user identifier. Never leaves the process.
    pub user_id: String,
    /// Opaque source address. Never leaves the process.
    pub src_ip: String,
    pub dest_host: String,
    /// eTLD+1 computed from the Public Suffix List snapshot.
    pub dest_domain: String,
    pub url: String,
    pub norm_path: String,
    pub norm_query: String,
    pub http_method: Option<String>,
    pub action: ActionTag,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub app_category: Option<String>,
    /// sha256 of the raw source line; keys the event back to its origin.
    pub lineage_hash: String,
    /// Filled in after signature derivation.
    #[serde(default)]
    pub url_signature: String,
}
