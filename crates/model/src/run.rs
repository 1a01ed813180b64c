use crate::VersionPins;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stages in execution order. `last_completed_stage` on the run row
/// stores the numeric value; resume starts at the next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    Ingest,
    Select,
    RuleClassify,
    Analyze,
    Evidence,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Setup,
        Stage::Ingest,
        Stage::Select,
        Stage::RuleClassify,
        Stage::Analyze,
        Stage::Evidence,
    ];

    pub fn number(&self) -> u32 {
        match self {
            Stage::Setup => 0,
            Stage::Ingest => 1,
            Stage::Select => 2,
            Stage::RuleClassify => 3,
            Stage::Analyze => 4,
            Stage::Evidence => 5,
        }
    }

    pub fn from_number(n: u32) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.number() == n)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Ingest => "ingest",
            Stage::Select => "select",
            Stage::RuleClassify => "rule_classify",
            Stage::Analyze => "analyze",
            Stage::Evidence => "evidence",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "partial" => Some(RunStatus::Partial),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Execution metadata for one run. Mutated only by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub run_key: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub last_completed_stage: u32,
    pub input_manifest_hash: String,
    pub range_start: Option<String>,
    pub range_end: Option<String>,
    pub pins: VersionPins,
    pub total_events: u64,
    pub unique_signatures: u64,
    pub cache_hit_count: u64,
    pub llm_sent_count: u64,
}
