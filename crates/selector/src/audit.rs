use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One merged qualifying burst window, `(start, end]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionCounts {
    pub total_events: u64,
    pub a_count: u64,
    pub b_count: u64,
    pub c_count: u64,
    /// Events eligible for the coverage sample (no A/B, under the A size).
    pub c_eligible: u64,
    /// Eligible events not drawn. Nothing is silently dropped: eligible
    /// always equals sampled plus excluded.
    pub c_excluded: u64,
}

/// Audit metadata the evidence bundle narrates. Thresholds and the sample
/// seed make non-selection explainable after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionAudit {
    pub a_min_bytes: u64,
    pub burst_window_secs: i64,
    pub burst_min_count: usize,
    pub cumulative_min_bytes: u64,
    pub high_risk_categories: Vec<String>,
    pub sample_rate: f64,
    pub sample_method: String,
    pub sample_seed: String,
    pub counts: SelectionCounts,
    pub exclusions: Vec<String>,
    /// Merged qualifying windows per (user, domain), keyed for narration.
    pub burst_windows: Vec<((String, String), Vec<BurstWindow>)>,
}
