use shadowscan_classify::PinnedTaxonomy;
use shadowscan_ingest::IngestOptions;
use shadowscan_model::VersionPins;
use shadowscan_normalize::NormalizerConfig;
use shadowscan_selector::SelectorConfig;
use std::path::PathBuf;

pub const DAILY_BUDGET_ENV: &str = "SHADOWSCAN_DAILY_BUDGET_USD";
pub const API_KEY_ENV: &str = "SHADOWSCAN_API_KEY";

/// Soft per-stage deadlines in seconds. On expiry the orchestrator flushes
/// what is committed and transitions the run to `partial`.
#[derive(Debug, Clone)]
pub struct StageDeadlines {
    pub ingest_secs: u64,
    pub select_secs: u64,
    pub rule_classify_secs: u64,
    pub analyze_secs: u64,
    pub evidence_secs: u64,
}

impl Default for StageDeadlines {
    fn default() -> Self {
        Self {
            ingest_secs: 3_600,
            select_secs: 3_600,
            rule_classify_secs: 1_800,
            analyze_secs: 7_200,
            evidence_secs: 1_800,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub input_dir: PathBuf,
    pub vendor: String,
    pub store_path: PathBuf,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    /// Vendor mapping document (JSON).
    pub mapping_path: PathBuf,
    /// Declarative rule set (JSON).
    pub rules_path: PathBuf,
    /// Version-keyed taxonomy artifact cache.
    pub taxonomy_cache_dir: PathBuf,
    /// Pinned Public Suffix List snapshot.
    pub psl_path: PathBuf,
    pub pinned_taxonomy: PinnedTaxonomy,
    pub pins: VersionPins,
    pub normalizer: NormalizerConfig,
    pub selector: SelectorConfig,
    pub ingest: IngestOptions,
    pub deadlines: StageDeadlines,
    pub range_start: Option<String>,
    pub range_end: Option<String>,
    /// Disable all LLM dispatch (tests, air-gapped runs).
    pub no_llm: bool,
    /// Resolve inputs and the run key, write nothing.
    pub dry_run: bool,
    pub llm_endpoint: String,
    pub llm_model: String,
    /// Ingestion worker fan-out.
    pub workers: usize,
}

impl EngineConfig {
    pub fn new(input_dir: PathBuf, vendor: &str, store_path: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            input_dir,
            vendor: vendor.to_string(),
            store_path,
            output_dir,
            work_dir: PathBuf::from("work"),
            mapping_path: PathBuf::new(),
            rules_path: PathBuf::new(),
            taxonomy_cache_dir: PathBuf::new(),
            psl_path: PathBuf::new(),
            pinned_taxonomy: PinnedTaxonomy {
                version: "1.0".to_string(),
                artifact_hash: None,
            },
            pins: VersionPins::default(),
            normalizer: NormalizerConfig::default(),
            selector: SelectorConfig::default(),
            ingest: IngestOptions::default(),
            deadlines: StageDeadlines::default(),
            range_start: None,
            range_end: None,
            no_llm: false,
            dry_run: false,
            llm_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            workers: 8,
        }
    }

    pub fn daily_budget_usd() -> f64 {
        std::env::var(DAILY_BUDGET_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10.0)
    }
}
