//! Run orchestration: run-key derivation, process lock, stage checkpointing,
//! resumption, and pinning enforcement.

mod config;
mod error;
mod lock;
mod orchestrator;
mod run_key;

pub use config::{EngineConfig, StageDeadlines};
pub use error::{EngineError, Result};
pub use lock::{LockAttempt, RunLock, LOCK_FILE_NAME};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use run_key::{
    compute_input_manifest_hash, compute_run_key, discover_inputs, run_id_from_key,
};
pub use shadowscan_model::RunStatus;
