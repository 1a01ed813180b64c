use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a classification verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClassificationSource {
    Rule,
    Llm,
    Human,
}

impl ClassificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationSource::Rule => "RULE",
            ClassificationSource::Llm => "LLM",
            ClassificationSource::Human => "HUMAN",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "RULE" => Some(ClassificationSource::Rule),
            "LLM" => Some(ClassificationSource::Llm),
            "HUMAN" => Some(ClassificationSource::Human),
            _ => None,
        }
    }
}

/// Lifecycle state of a classification record.
///
/// `active` records are eligible for (re-)analysis, `needs_review` waits for
/// a person, `skipped` is terminal and never resent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    NeedsReview,
    Skipped,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::NeedsReview => "needs_review",
            RecordStatus::Skipped => "skipped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(RecordStatus::Active),
            "needs_review" => Some(RecordStatus::NeedsReview),
            "skipped" => Some(RecordStatus::Skipped),
            _ => None,
        }
    }
}

/// Classification failure kinds. Permanent kinds move the signature to
/// `skipped`; transient kinds set `retry_after` and stay `active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ContextLengthExceeded,
    InvalidRequest,
    InvalidApiKey,
    Authentication,
    RateLimit,
    Timeout,
    ServerError,
    Network,
    SchemaViolation,
}

impl ErrorKind {
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ErrorKind::ContextLengthExceeded
                | ErrorKind::InvalidRequest
                | ErrorKind::InvalidApiKey
                | ErrorKind::Authentication
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ContextLengthExceeded => "context_length_exceeded",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::InvalidApiKey => "invalid_api_key",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Network => "network",
            ErrorKind::SchemaViolation => "schema_violation",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "context_length_exceeded" => Some(ErrorKind::ContextLengthExceeded),
            "invalid_request" => Some(ErrorKind::InvalidRequest),
            "invalid_api_key" => Some(ErrorKind::InvalidApiKey),
            "authentication" => Some(ErrorKind::Authentication),
            "rate_limit" => Some(ErrorKind::RateLimit),
            "timeout" => Some(ErrorKind::Timeout),
            "server_error" => Some(ErrorKind::ServerError),
            "network" => Some(ErrorKind::Network),
            "schema_violation" => Some(ErrorKind::SchemaViolation),
            _ => None,
        }
    }
}

/// Eight-dimension taxonomy assignment. Arrays are kept sorted and
/// deduplicated so serialization is byte-stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyAssignment {
    /// Functional scope: exactly one code.
    pub fs_code: String,
    /// Integration mode: exactly one code.
    pub im_code: String,
    /// Use-case class: one or more codes.
    pub uc_codes: Vec<String>,
    /// Data type: one or more codes.
    pub dt_codes: Vec<String>,
    /// Channel: one or more codes.
    pub ch_codes: Vec<String>,
    /// Risk surface: one or more codes.
    pub rs_codes: Vec<String>,
    /// Log/event type: one or more codes.
    pub ev_codes: Vec<String>,
    /// Outcome/benefit: zero or more codes.
    pub ob_codes: Vec<String>,
}

impl TaxonomyAssignment {
    /// Sort and deduplicate every multi-value dimension in place.
    pub fn canonicalize(&mut self) {
        for codes in [
            &mut self.uc_codes,
            &mut self.dt_codes,
            &mut self.ch_codes,
            &mut self.rs_codes,
            &mut self.ev_codes,
            &mut self.ob_codes,
        ] {
            codes.sort();
            codes.dedup();
        }
    }
}

/// The keyed-by-signature analytical verdict, shared across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub url_signature: String,
    pub service_name: String,
    pub usage_type: String,
    pub risk_level: String,
    pub category: String,
    pub confidence: f64,
    pub rationale_short: String,
    pub source: ClassificationSource,
    pub signature_version: String,
    pub rule_version: String,
    pub prompt_version: String,
    pub taxonomy_version: String,
    pub status: RecordStatus,
    pub is_human_verified: bool,
    pub taxonomy: TaxonomyAssignment,
    pub error_kind: Option<ErrorKind>,
    pub error_reason: Option<String>,
    pub retry_after: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl ClassificationRecord {
    /// A fresh active record with no verdict yet.
    pub fn pending(url_signature: &str) -> Self {
        Self {
            url_signature: url_signature.to_string(),
            service_name: String::new(),
            usage_type: "unknown".to_string(),
            risk_level: "unknown".to_string(),
            category: "Unknown".to_string(),
            confidence: 0.0,
            rationale_short: String::new(),
            source: ClassificationSource::Rule,
            signature_version: String::new(),
            rule_version: String::new(),
            prompt_version: String::new(),
            taxonomy_version: String::new(),
            status: RecordStatus::Active,
            is_human_verified: false,
            taxonomy: TaxonomyAssignment::default(),
            error_kind: None,
            error_reason: None,
            retry_after: None,
            failure_count: 0,
            analyzed_at: None,
        }
    }
}
