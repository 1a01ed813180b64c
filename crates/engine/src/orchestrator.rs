use crate::config::{EngineConfig, API_KEY_ENV};
use crate::lock::{LockAttempt, RunLock};
use crate::run_key::{
    compute_input_manifest_hash, compute_run_key, discover_inputs, run_id_from_key,
};
use crate::{EngineError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shadowscan_analyzer::{AnalyzerConfig, BudgetBucket, HttpLlmClient, LlmAnalyzer};
use shadowscan_classify::{enforce_pinning, resolve_taxonomy_artifact, RuleSet, TaxonomyAdapter};
use shadowscan_evidence::{BundleInputs, EvidenceEmitter};
use shadowscan_ingest::{IngestedFile, Ingestor, VendorMapping};
use shadowscan_model::{
    CanonicalEvent, ClassificationRecord, ClassificationSource, PiiAuditRecord, PiiKind,
    RecordStatus, RunRecord, RunStatus, Stage, UrlSignature,
};
use shadowscan_normalize::{Canonicalizer, PublicSuffixList, SignatureBuilder, SignatureInput};
use shadowscan_selector::{Selection, Selector};
use shadowscan_store::{Intent, Store, WriterHandle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub enum RunOutcome {
    /// Another process holds the run lock. Not an error.
    AlreadyRunning { holder: String },
    DryRun {
        run_id: String,
        run_key: String,
        input_files: usize,
    },
    Completed {
        run_id: String,
        status: RunStatus,
        bundle_dir: Option<PathBuf>,
    },
}

/// Serialized PII observation, joined to a signature once stage 2 has
/// derived one for its event.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingPii {
    lineage_hash: String,
    kind: PiiKind,
    field_source: String,
    original_hash: String,
    occurrences: u32,
}

/// Loaded, pinned, validated collaborators for one run.
struct Components {
    psl: Arc<PublicSuffixList>,
    canonicalizer: Arc<Canonicalizer>,
    signature_builder: SignatureBuilder,
    taxonomy: TaxonomyAdapter,
    rules: RuleSet,
    mapping: Arc<VendorMapping>,
    pins: shadowscan_model::VersionPins,
}

pub struct Orchestrator {
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Execute (or resume) the run described by the configuration.
    pub async fn run(&self) -> Result<RunOutcome> {
        let components = self.load_components()?;

        let inputs = discover_inputs(&self.config.input_dir)?;
        if inputs.is_empty() {
            return Err(EngineError::NoInputs(
                self.config.input_dir.display().to_string(),
            ));
        }
        let manifest_hash = compute_input_manifest_hash(&inputs)?;
        let run_key = compute_run_key(
            &manifest_hash,
            self.config.range_start.as_deref(),
            self.config.range_end.as_deref(),
            &components.pins,
        );
        let run_id = run_id_from_key(&run_key);

        if self.config.dry_run {
            return Ok(RunOutcome::DryRun {
                run_id,
                run_key,
                input_files: inputs.len(),
            });
        }

        let store_dir = self
            .config
            .store_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let lock = match RunLock::try_acquire(&store_dir)? {
            LockAttempt::Acquired(lock) => lock,
            LockAttempt::Held { holder } => {
                log::info!("another run is active ({holder}); exiting");
                return Ok(RunOutcome::AlreadyRunning { holder });
            }
        };

        let store = Store::open(&self.config.store_path)?;
        let writer = store.spawn_writer()?;
        let handle = writer.handle();

        let result = self
            .execute_stages(
                &components,
                &store,
                &handle,
                &inputs,
                &manifest_hash,
                &run_key,
                &run_id,
            )
            .await;

        let outcome = match result {
            Ok(bundle_dir) => {
                self.finalize(&handle, &run_id, RunStatus::Succeeded);
                Ok(RunOutcome::Completed {
                    run_id,
                    status: RunStatus::Succeeded,
                    bundle_dir: Some(bundle_dir),
                })
            }
            Err(EngineError::Store(shadowscan_store::StoreError::WriterClosed)) => {
                log::warn!("writer queue closed mid-run; transitioning to partial");
                Ok(RunOutcome::Completed {
                    run_id,
                    status: RunStatus::Partial,
                    bundle_dir: None,
                })
            }
            Err(EngineError::StageDeadline { stage }) => {
                log::warn!("stage {stage} deadline expired; transitioning to partial");
                self.finalize(&handle, &run_id, RunStatus::Partial);
                Ok(RunOutcome::Completed {
                    run_id,
                    status: RunStatus::Partial,
                    bundle_dir: None,
                })
            }
            Err(err) => {
                self.finalize(&handle, &run_id, RunStatus::Failed);
                Err(err)
            }
        };

        let _ = handle.flush();
        if let Err(err) = writer.shutdown() {
            log::warn!("writer shutdown: {err}");
        }
        drop(lock);
        outcome
    }

    fn finalize(&self, handle: &WriterHandle, run_id: &str, status: RunStatus) {
        let intent = Intent::FinalizeRun {
            run_id: run_id.to_string(),
            status,
            finished_at: Utc::now(),
        };
        if handle.enqueue(intent).is_ok() {
            let _ = handle.flush();
        }
    }

    fn load_components(&self) -> Result<Components> {
        // PSL is a pinned input: absence is fatal before anything runs.
        let psl = PublicSuffixList::load(&self.config.psl_path)?;
        let canonicalizer = Canonicalizer::new(self.config.normalizer.clone())?;
        let signature_builder = SignatureBuilder::new(self.config.normalizer.clone());

        let resolved = resolve_taxonomy_artifact(
            &self.config.taxonomy_cache_dir,
            &self.config.pinned_taxonomy.version,
        )?;
        enforce_pinning(&self.config.pinned_taxonomy, &resolved)?;
        let taxonomy = TaxonomyAdapter::load(&resolved.artifact_dir)?;
        let rules = RuleSet::load(&self.config.rules_path)?;
        let mapping = VendorMapping::load(&self.config.mapping_path)?;
        if mapping.vendor != self.config.vendor {
            return Err(EngineError::Config(format!(
                "mapping is for vendor {:?}, run is tagged {:?}",
                mapping.vendor, self.config.vendor
            )));
        }

        let mut pins = self.config.pins.clone();
        pins.signature_scheme_version = self.config.normalizer.signature_scheme_version.clone();
        pins.rule_version = rules.version().to_string();
        pins.taxonomy_version = resolved.version.clone();
        pins.taxonomy_artifact_hash = resolved.artifact_hash.clone();

        Ok(Components {
            psl: Arc::new(psl),
            canonicalizer: Arc::new(canonicalizer),
            signature_builder,
            taxonomy,
            rules,
            mapping: Arc::new(mapping),
            pins,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_stages(
        &self,
        components: &Components,
        store: &Store,
        handle: &WriterHandle,
        inputs: &[PathBuf],
        manifest_hash: &str,
        run_key: &str,
        run_id: &str,
    ) -> Result<PathBuf> {
        let work_dir = self.config.work_dir.join(run_id);
        std::fs::create_dir_all(&work_dir)?;

        // Stage 0: create or resume the run row.
        let reader = store.reader()?;
        let resume_stage = match reader.get_run(run_id)? {
            Some(existing) => {
                if existing.run_key != run_key {
                    return Err(EngineError::RunKeyCollision {
                        run_id: run_id.to_string(),
                    });
                }
                log::info!(
                    "resuming run {run_id} from stage {}",
                    existing.last_completed_stage
                );
                existing.last_completed_stage
            }
            None => {
                let run = RunRecord {
                    run_id: run_id.to_string(),
                    run_key: run_key.to_string(),
                    started_at: Utc::now(),
                    finished_at: None,
                    status: RunStatus::Running,
                    last_completed_stage: Stage::Setup.number(),
                    input_manifest_hash: manifest_hash.to_string(),
                    range_start: self.config.range_start.clone(),
                    range_end: self.config.range_end.clone(),
                    pins: components.pins.clone(),
                    total_events: 0,
                    unique_signatures: 0,
                    cache_hit_count: 0,
                    llm_sent_count: 0,
                };
                handle.enqueue(Intent::UpsertRun(run))?;
                handle.flush()?;
                Stage::Setup.number()
            }
        };

        let deadlines = &self.config.deadlines;

        // Stage 1: ingestion.
        if resume_stage < Stage::Ingest.number() {
            let started = Instant::now();
            let (events, pii) = with_deadline(
                "ingest",
                deadlines.ingest_secs,
                self.ingest_inputs(components, handle, inputs, run_id),
            )
            .await??;
            persist_events(&work_dir, &events, &pii)?;
            self.record_metric(handle, run_id, "stage_ingest_secs", started.elapsed())?;
            self.checkpoint(handle, run_id, Stage::Ingest)?;
        }

        // Stage 2: signatures, candidate selection, statistics, PII audit.
        if resume_stage < Stage::Select.number() {
            let started = Instant::now();
            let (events, pii) = load_events(&work_dir)?;
            with_deadline(
                "select",
                deadlines.select_secs,
                self.select_candidates(components, store, handle, run_id, events, pii, &work_dir),
            )
            .await??;
            self.record_metric(handle, run_id, "stage_select_secs", started.elapsed())?;
            self.checkpoint(handle, run_id, Stage::Select)?;
        }

        // Stage 3: rule classification over the run's signatures.
        if resume_stage < Stage::RuleClassify.number() {
            let started = Instant::now();
            with_deadline(
                "rule_classify",
                deadlines.rule_classify_secs,
                self.rule_classify(components, store, handle, run_id),
            )
            .await??;
            self.record_metric(handle, run_id, "stage_rule_classify_secs", started.elapsed())?;
            self.checkpoint(handle, run_id, Stage::RuleClassify)?;
        }

        // Stage 4: LLM analysis of the residual.
        if resume_stage < Stage::Analyze.number() {
            let started = Instant::now();
            if self.config.no_llm {
                log::info!("LLM analysis disabled for this run (--no-llm)");
            } else {
                with_deadline(
                    "analyze",
                    deadlines.analyze_secs,
                    self.analyze(components, store, handle, run_id),
                )
                .await??;
            }
            self.record_metric(handle, run_id, "stage_analyze_secs", started.elapsed())?;
            self.checkpoint(handle, run_id, Stage::Analyze)?;
        }

        // Stage 5: evidence bundle. Statistics are final at this boundary.
        // A completed run's bundle is never re-emitted: that keeps
        // re-execution byte-identical.
        let bundle_dir = self.config.output_dir.join(format!("evidence_bundle_{run_id}"));
        let already_emitted =
            resume_stage >= Stage::Evidence.number() && bundle_dir.join("manifest.json").exists();
        if !already_emitted {
            let started = Instant::now();
            with_deadline(
                "evidence",
                deadlines.evidence_secs,
                self.emit_evidence(components, store, handle, run_id, &work_dir, &bundle_dir),
            )
            .await??;
            self.record_metric(handle, run_id, "stage_evidence_secs", started.elapsed())?;
            self.checkpoint(handle, run_id, Stage::Evidence)?;
        }

        Ok(bundle_dir)
    }

    async fn ingest_inputs(
        &self,
        components: &Components,
        handle: &WriterHandle,
        inputs: &[PathBuf],
        run_id: &str,
    ) -> Result<(Vec<CanonicalEvent>, Vec<PendingPii>)> {
        let mut events: Vec<CanonicalEvent> = Vec::new();
        let mut pending_pii: Vec<PendingPii> = Vec::new();
        let ingested_at = Utc::now();

        // Bounded fan-out; each worker parses one file.
        for wave in inputs.chunks(self.config.workers.max(1)) {
            let mut tasks = Vec::with_capacity(wave.len());
            for path in wave {
                let path = path.clone();
                let mapping = Arc::clone(&components.mapping);
                let canonicalizer = Arc::clone(&components.canonicalizer);
                let psl = Arc::clone(&components.psl);
                let options = self.config.ingest.clone();
                tasks.push(tokio::task::spawn_blocking(move || {
                    let ingestor = Ingestor::new(&mapping, &canonicalizer, &psl, options);
                    ingestor.ingest_file(&path)
                }));
            }
            for task in tasks {
                let ingested: IngestedFile = task
                    .await
                    .map_err(|err| EngineError::Config(format!("ingest task: {err}")))??;
                let summary = &ingested.summary;
                let file_id = format!("{run_id}_{}", summary.file_hash);
                handle.enqueue(Intent::UpsertInputFile(shadowscan_store::InputFileRow {
                    file_id,
                    run_id: run_id.to_string(),
                    file_path: summary.file_path.clone(),
                    file_size: summary.file_size,
                    file_hash: summary.file_hash.clone(),
                    vendor: summary.vendor.clone(),
                    min_time: summary.min_time,
                    max_time: summary.max_time,
                    row_count: summary.row_count,
                    parse_error_count: summary.parse_error_count,
                    ingested_at,
                }))?;

                for (event, detections) in ingested.events.into_iter().zip(ingested.pii) {
                    for detection in detections {
                        pending_pii.push(PendingPii {
                            lineage_hash: event.lineage_hash.clone(),
                            kind: detection.kind,
                            field_source: detection.field_source.to_string(),
                            original_hash: detection.original_hash,
                            occurrences: detection.occurrences,
                        });
                    }
                    events.push(event);
                }
            }
        }
        log::info!("ingested {} events from {} files", events.len(), inputs.len());
        Ok((events, pending_pii))
    }

    #[allow(clippy::too_many_arguments)]
    async fn select_candidates(
        &self,
        components: &Components,
        store: &Store,
        handle: &WriterHandle,
        run_id: &str,
        mut events: Vec<CanonicalEvent>,
        pending_pii: Vec<PendingPii>,
        work_dir: &std::path::Path,
    ) -> Result<()> {
        // Derive signatures.
        let mut signatures: HashMap<String, UrlSignature> = HashMap::new();
        for event in &mut events {
            let derived = components.signature_builder.build(&SignatureInput {
                norm_host: &event.dest_host,
                norm_path: &event.norm_path,
                norm_query: &event.norm_query,
                http_method: event.http_method.as_deref(),
                bytes_sent: event.bytes_sent,
            });
            event.url_signature = derived.signature.clone();
            signatures.entry(derived.signature.clone()).or_insert(derived);
        }

        // Candidate selection is a pure aggregation over the stream.
        let selector = Selector::new(self.config.selector.clone(), run_id);
        let selection: Selection = selector.select(&events, &signatures);
        for stats in &selection.stats {
            handle.enqueue(Intent::UpsertStats(stats.clone()))?;
        }

        // PII audit rows, joined to signatures and aggregated.
        let signature_of: HashMap<&str, &str> = events
            .iter()
            .map(|e| (e.lineage_hash.as_str(), e.url_signature.as_str()))
            .collect();
        let mut aggregated: HashMap<(String, PiiKind, String, String), u32> = HashMap::new();
        for pii in pending_pii {
            let Some(signature) = signature_of.get(pii.lineage_hash.as_str()) else {
                continue;
            };
            *aggregated
                .entry((
                    signature.to_string(),
                    pii.kind,
                    pii.field_source,
                    pii.original_hash,
                ))
                .or_insert(0) += pii.occurrences;
        }
        let mut audit_rows: Vec<_> = aggregated.into_iter().collect();
        audit_rows.sort_by(|a, b| a.0.cmp(&b.0));
        for ((signature, kind, field_source, original_hash), occurrences) in audit_rows {
            handle.enqueue(Intent::AppendPiiAudit(PiiAuditRecord {
                run_id: run_id.to_string(),
                url_signature: signature,
                kind,
                field_source,
                redaction_token: kind.replacement().to_string(),
                original_hash,
                occurrence_count: occurrences,
            }))?;
        }

        // The selection audit narrates stage 5; persist it in the work area.
        let audit_json = serde_json::to_value(&selection.audit)
            .map_err(|err| EngineError::Config(format!("audit serialize: {err}")))?;
        write_atomic(
            &work_dir.join("selection_audit.json"),
            audit_json.to_string().as_bytes(),
        )?;

        // The definitive manifest hash now includes ingestion outcomes.
        handle.flush()?;
        let reader = store.reader()?;
        let registry = reader.input_files_for_run(run_id)?;
        let mut entries: Vec<String> = registry
            .iter()
            .map(|row| {
                format!(
                    "{}|{}|{}|{}",
                    row.file_hash,
                    row.vendor,
                    row.min_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    row.max_time.map(|t| t.to_rfc3339()).unwrap_or_default()
                )
            })
            .collect();
        entries.sort();
        let definitive = hex::encode(Sha256::digest(entries.join("\n").as_bytes()));
        if let Some(mut run) = reader.get_run(run_id)? {
            run.input_manifest_hash = definitive;
            run.total_events = events.len() as u64;
            run.unique_signatures = signatures.len() as u64;
            handle.enqueue(Intent::UpsertRun(run))?;
        }
        handle.enqueue(Intent::UpdateRunCounters {
            run_id: run_id.to_string(),
            total_events: events.len() as u64,
            unique_signatures: signatures.len() as u64,
            cache_hit_count: 0,
            llm_sent_count: 0,
        })?;
        handle.flush()?;
        Ok(())
    }

    async fn rule_classify(
        &self,
        components: &Components,
        store: &Store,
        handle: &WriterHandle,
        run_id: &str,
    ) -> Result<()> {
        let reader = store.reader()?;
        let stats = reader.stats_for_run(run_id)?;
        let mut cache_hits = 0u64;
        let mut rule_classified = 0u64;
        let mut deferred_to_llm = 0u64;

        for stat in &stats {
            if let Some(existing) = reader.get_classification(&stat.url_signature)? {
                // A cached verdict (of any status) is authoritative for the
                // cache-lookup stage; the pending view decides LLM eligibility.
                if existing.status != RecordStatus::Active
                    || !existing.service_name.is_empty()
                    || existing.is_human_verified
                {
                    cache_hits += 1;
                    continue;
                }
            }
            let verdict = components.rules.classify(
                &stat.norm_host,
                &stat.dest_domain,
                &stat.norm_path_template,
                &components.taxonomy,
            )?;
            let record = match verdict {
                Some(verdict) => {
                    rule_classified += 1;
                    ClassificationRecord {
                        url_signature: stat.url_signature.clone(),
                        service_name: verdict.service_name,
                        usage_type: verdict.usage_type,
                        risk_level: verdict.risk_level,
                        category: verdict.category,
                        confidence: 1.0,
                        rationale_short: format!("rule {}", verdict.rule_id),
                        source: ClassificationSource::Rule,
                        signature_version: components.pins.signature_scheme_version.clone(),
                        rule_version: components.pins.rule_version.clone(),
                        prompt_version: components.pins.prompt_version.clone(),
                        taxonomy_version: components.pins.taxonomy_version.clone(),
                        status: RecordStatus::Active,
                        is_human_verified: false,
                        taxonomy: verdict.taxonomy,
                        error_kind: None,
                        error_reason: None,
                        retry_after: None,
                        failure_count: 0,
                        analyzed_at: None,
                    }
                }
                None => {
                    deferred_to_llm += 1;
                    let mut pending = ClassificationRecord::pending(&stat.url_signature);
                    pending.signature_version =
                        components.pins.signature_scheme_version.clone();
                    pending.rule_version = components.pins.rule_version.clone();
                    pending.prompt_version = components.pins.prompt_version.clone();
                    pending.taxonomy_version = components.pins.taxonomy_version.clone();
                    pending
                }
            };
            handle.enqueue(Intent::UpsertClassification(record))?;
        }

        handle.enqueue(Intent::RecordMetric {
            run_id: run_id.to_string(),
            name: "cache_hit_count".to_string(),
            value: cache_hits as f64,
            recorded_at: Utc::now(),
        })?;
        log::info!(
            "rule classification: {cache_hits} cache hits, {rule_classified} rule verdicts, \
             {deferred_to_llm} deferred to LLM"
        );

        // Refresh counters on the run row.
        handle.flush()?;
        if let Some(run) = reader.get_run(run_id)? {
            handle.enqueue(Intent::UpdateRunCounters {
                run_id: run_id.to_string(),
                total_events: run.total_events,
                unique_signatures: run.unique_signatures,
                cache_hit_count: cache_hits,
                llm_sent_count: run.llm_sent_count,
            })?;
        }
        handle.flush()?;
        Ok(())
    }

    async fn analyze(
        &self,
        components: &Components,
        store: &Store,
        handle: &WriterHandle,
        run_id: &str,
    ) -> Result<()> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| {
            EngineError::Analyzer(shadowscan_analyzer::AnalyzerError::MissingCredential(
                API_KEY_ENV,
            ))
        })?;
        let transport = HttpLlmClient::new(
            &self.config.llm_endpoint,
            &api_key,
            &self.config.llm_model,
        )
        .map_err(|err| EngineError::Analyzer(shadowscan_analyzer::AnalyzerError::Transport(
            err.to_string(),
        )))?;

        let reader = store.reader()?;
        let run_stats: HashMap<String, _> = reader
            .stats_for_run(run_id)?
            .into_iter()
            .map(|stat| (stat.url_signature.clone(), stat))
            .collect();

        let analyzer = Arc::new(LlmAnalyzer::new(
            AnalyzerConfig {
                enabled: true,
                pins: components.pins.clone(),
                ..Default::default()
            },
            Arc::new(transport),
            BudgetBucket::new(EngineConfig::daily_budget_usd()),
            components.taxonomy.clone(),
        ));
        let outcome = analyzer
            .analyze_run(&reader, handle, &run_stats, Utc::now())
            .await?;
        handle.flush()?;
        log::info!(
            "LLM analysis: {} analyzed, {} needs review, {} skipped, {} deferred, \
             {} dropped by budget, {:.4} USD spent",
            outcome.analyzed,
            outcome.needs_review,
            outcome.skipped,
            outcome.deferred,
            outcome.budget_dropped,
            outcome.spent_usd
        );

        if let Some(run) = reader.get_run(run_id)? {
            handle.enqueue(Intent::UpdateRunCounters {
                run_id: run_id.to_string(),
                total_events: run.total_events,
                unique_signatures: run.unique_signatures,
                cache_hit_count: run.cache_hit_count,
                llm_sent_count: outcome.analyzed + outcome.needs_review,
            })?;
        }
        handle.enqueue(Intent::RecordMetric {
            run_id: run_id.to_string(),
            name: "llm_budget_spent_usd".to_string(),
            value: outcome.spent_usd,
            recorded_at: Utc::now(),
        })?;
        handle.flush()?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit_evidence(
        &self,
        components: &Components,
        store: &Store,
        handle: &WriterHandle,
        run_id: &str,
        work_dir: &std::path::Path,
        bundle_dir: &std::path::Path,
    ) -> Result<()> {
        handle.flush()?;
        let reader = store.reader()?;
        let run = reader
            .get_run(run_id)?
            .ok_or_else(|| EngineError::Config(format!("run {run_id} vanished")))?;
        let stats = reader.stats_for_run(run_id)?;
        let mut classifications = Vec::new();
        for stat in &stats {
            if let Some(record) = reader.get_classification(&stat.url_signature)? {
                classifications.push(record);
            }
        }
        let selection_audit: serde_json::Value =
            match std::fs::read(work_dir.join("selection_audit.json")) {
                Ok(bytes) => serde_json::from_slice(&bytes)
                    .map_err(|err| EngineError::Config(format!("selection audit: {err}")))?,
                Err(_) => serde_json::json!(null),
            };
        let metrics = reader.metrics_for_run(run_id)?;
        let pii_audit_count = reader.pii_audit_count(run_id)?;

        let inputs = BundleInputs {
            run,
            stats,
            classifications,
            selection_audit,
            metrics,
            pii_audit_count,
            psl_hash: components.psl.snapshot_hash().to_string(),
        };
        let bundle_dir = bundle_dir.to_path_buf();
        tokio::task::spawn_blocking(move || EvidenceEmitter::emit(&inputs, &bundle_dir))
            .await
            .map_err(|err| EngineError::Config(format!("evidence task: {err}")))??;
        Ok(())
    }

    fn checkpoint(&self, handle: &WriterHandle, run_id: &str, stage: Stage) -> Result<()> {
        handle.enqueue(Intent::Checkpoint {
            run_id: run_id.to_string(),
            stage: stage.number(),
            status: RunStatus::Running,
        })?;
        handle.flush()?;
        Ok(())
    }

    fn record_metric(
        &self,
        handle: &WriterHandle,
        run_id: &str,
        name: &str,
        elapsed: Duration,
    ) -> Result<()> {
        handle.enqueue(Intent::RecordMetric {
            run_id: run_id.to_string(),
            name: name.to_string(),
            value: elapsed.as_secs_f64(),
            recorded_at: Utc::now(),
        })?;
        Ok(())
    }
}

async fn with_deadline<T>(
    stage: &'static str,
    deadline_secs: u64,
    future: impl std::future::Future<Output = T>,
) -> Result<T> {
    tokio::time::timeout(Duration::from_secs(deadline_secs.max(1)), future)
        .await
        .map_err(|_| EngineError::StageDeadline { stage })
}

fn persist_events(
    work_dir: &std::path::Path,
    events: &[CanonicalEvent],
    pii: &[PendingPii],
) -> Result<()> {
    let mut event_lines = String::new();
    for event in events {
        event_lines.push_str(
            &serde_json::to_string(event)
                .map_err(|err| EngineError::Config(format!("persist events: {err}")))?,
        );
        event_lines.push('\n');
    }
    write_atomic(&work_dir.join("events.jsonl"), event_lines.as_bytes())?;

    let mut pii_lines = String::new();
    for entry in pii {
        pii_lines.push_str(
            &serde_json::to_string(entry)
                .map_err(|err| EngineError::Config(format!("persist pii: {err}")))?,
        );
        pii_lines.push('\n');
    }
    write_atomic(&work_dir.join("pii.jsonl"), pii_lines.as_bytes())?;
    Ok(())
}

fn load_events(work_dir: &std::path::Path) -> Result<(Vec<CanonicalEvent>, Vec<PendingPii>)> {
    let events_text = std::fs::read_to_string(work_dir.join("events.jsonl"))?;
    let mut events = Vec::new();
    for line in events_text.lines() {
        if line.is_empty() {
            continue;
        }
        events.push(
            serde_json::from_str(line)
                .map_err(|err| EngineError::Config(format!("load events: {err}")))?,
        );
    }
    let pii_text = std::fs::read_to_string(work_dir.join("pii.jsonl")).unwrap_or_default();
    let mut pii = Vec::new();
    for line in pii_text.lines() {
        if line.is_empty() {
            continue;
        }
        pii.push(
            serde_json::from_str(line)
                .map_err(|err| EngineError::Config(format!("load pii: {err}")))?,
        );
    }
    Ok((events, pii))
}

fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
