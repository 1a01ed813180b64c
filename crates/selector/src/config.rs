use serde::{Deserialize, Serialize};
use shadowscan_model::ActionTag;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// A: single transfer at or above this size flags the signature.
    pub a_min_bytes: u64,
    /// B burst: window width in seconds.
    pub burst_window_secs: i64,
    /// B burst: write events needed inside one window.
    pub burst_min_count: usize,
    /// B cumulative: upload bytes per (user, domain, UTC day).
    pub cumulative_min_bytes: u64,
    /// B: category hints that mark a destination high-risk.
    pub high_risk_categories: Vec<String>,
    /// C: sample rate in [0, 1]. Zero disables sampling but still accounts
    /// for every excluded event.
    pub c_sample_rate: f64,
    /// Only events with this action participate in A/B aggregation; `None`
    /// aggregates everything.
    pub action_filter: Option<ActionTag>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            a_min_bytes: 1024 * 1024,
            burst_window_secs: 300,
            burst_min_count: 20,
            cumulative_min_bytes: 20 * 1024 * 1024,
            high_risk_categories: ["GenAI", "AI", "Unknown", "Uncategorized"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            c_sample_rate: 0.02,
            action_filter: Some(ActionTag::Allow),
        }
    }
}
