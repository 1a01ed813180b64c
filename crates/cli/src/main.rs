use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shadowscan_classify::PinnedTaxonomy;
use shadowscan_engine::{EngineConfig, Orchestrator, RunOutcome};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "shadowscan")]
#[command(about = "Deterministic classification of web-access logs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute (or resume) a classification run over an input directory
    Run {
        /// Directory of vendor-tagged input files
        input: PathBuf,

        /// Vendor tag (must match the mapping document)
        #[arg(long)]
        vendor: String,

        /// Path to the canonical store database
        #[arg(long, default_value = "data/cache/shadowscan.db")]
        store: PathBuf,

        /// Output directory for evidence bundles
        #[arg(long, default_value = "out")]
        out: PathBuf,

        /// Working area for run-scoped artifacts
        #[arg(long, default_value = "data/work")]
        work: PathBuf,

        /// Vendor field-mapping document (JSON)
        #[arg(long)]
        mapping: PathBuf,

        /// Declarative rule set (JSON)
        #[arg(long, default_value = "rules/base_rules.json")]
        rules: PathBuf,

        /// Version-keyed taxonomy artifact cache directory
        #[arg(long, default_value = "data/taxonomy")]
        taxonomy_cache: PathBuf,

        /// Pinned taxonomy version
        #[arg(long, default_value = "1.0")]
        taxonomy_version: String,

        /// Expected taxonomy artifact hash (version-only pin when omitted)
        #[arg(long)]
        taxonomy_hash: Option<String>,

        /// Pinned Public Suffix List snapshot
        #[arg(long, default_value = "data/psl/public_suffix_list.dat")]
        psl: PathBuf,

        /// Analysis window start (YYYY-MM-DD)
        #[arg(long)]
        range_start: Option<String>,

        /// Analysis window end (YYYY-MM-DD)
        #[arg(long)]
        range_end: Option<String>,

        /// Disable LLM analysis (for tests and air-gapped runs)
        #[arg(long)]
        no_llm: bool,

        /// Resolve inputs and the run key without executing
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate an evidence bundle directory
    ValidateBundle {
        /// Bundle directory (containing manifest.json)
        bundle: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run {
            input,
            vendor,
            store,
            out,
            work,
            mapping,
            rules,
            taxonomy_cache,
            taxonomy_version,
            taxonomy_hash,
            psl,
            range_start,
            range_end,
            no_llm,
            dry_run,
        } => {
            let mut config = EngineConfig::new(input, &vendor, store, out);
            config.work_dir = work;
            config.mapping_path = mapping;
            config.rules_path = rules;
            config.taxonomy_cache_dir = taxonomy_cache;
            config.psl_path = psl;
            config.pinned_taxonomy = PinnedTaxonomy {
                version: taxonomy_version,
                artifact_hash: taxonomy_hash,
            };
            config.range_start = range_start;
            config.range_end = range_end;
            config.no_llm = no_llm;
            config.dry_run = dry_run;

            let outcome = Orchestrator::new(config)
                .run()
                .await
                .context("run failed")?;
            report_outcome(outcome)
        }
        Commands::ValidateBundle { bundle } => {
            let problems = shadowscan_evidence::validate_bundle(&bundle)
                .context("failed to read bundle")?;
            let valid = problems.is_empty();
            println!(
                "{}",
                serde_json::json!({
                    "bundle": bundle.display().to_string(),
                    "valid": valid,
                    "problems": problems,
                })
            );
            Ok(if valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn report_outcome(outcome: RunOutcome) -> Result<ExitCode> {
    match outcome {
        RunOutcome::AlreadyRunning { holder } => {
            // Not an error: the lock prevented a double-run.
            println!(
                "{}",
                serde_json::json!({"status": "already_running", "holder": holder})
            );
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::DryRun {
            run_id,
            run_key,
            input_files,
        } => {
            println!(
                "{}",
                serde_json::json!({
                    "status": "dry_run",
                    "run_id": run_id,
                    "run_key": run_key,
                    "input_files": input_files,
                })
            );
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Completed {
            run_id,
            status,
            bundle_dir,
        } => {
            println!(
                "{}",
                serde_json::json!({
                    "status": status.as_str(),
                    "run_id": run_id,
                    "bundle_dir": bundle_dir.as_ref().map(|p| p.display().to_string()),
                })
            );
            // `partial` still exits zero: the run is resumable.
            match status {
                shadowscan_engine::RunStatus::Failed => Ok(ExitCode::FAILURE),
                _ => Ok(ExitCode::SUCCESS),
            }
        }
    }
}
