use crate::budget::BudgetBucket;
use crate::client::{ClientError, LlmTransport};
use crate::payload::{BatchPayload, PayloadItem};
use crate::response::{parse_and_validate, ValidatedItem};
use crate::{AnalyzerError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use shadowscan_classify::TaxonomyAdapter;
use shadowscan_model::{
    ClassificationRecord, ClassificationSource, ErrorKind, RecordStatus, SignatureStats,
    VersionPins,
};
use shadowscan_store::{Intent, Reader, WriterHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// `--no-llm` runs refuse any dispatch.
    pub enabled: bool,
    pub pins: VersionPins,
    /// Character budget per batch; the item cap still applies.
    pub max_batch_chars: usize,
    /// Schema-violation attempts per batch before needs-review.
    pub max_schema_attempts: u32,
    pub base_backoff_secs: i64,
    pub jitter_max_ms: i64,
    pub cost_per_1k_tokens_usd: f64,
    /// Assumed completion size per signature, for cost estimation.
    pub estimated_output_tokens_per_item: u64,
    /// Concurrent batch dispatches (bounded worker pool).
    pub concurrency: usize,
    /// Upper bound on pending signatures fetched per run.
    pub pending_limit: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pins: VersionPins::default(),
            max_batch_chars: 8_000,
            max_schema_attempts: 2,
            base_backoff_secs: 30,
            jitter_max_ms: 300,
            cost_per_1k_tokens_usd: 0.01,
            estimated_output_tokens_per_item: 200,
            concurrency: 4,
            pending_limit: 5_000,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct AnalyzerOutcome {
    pub analyzed: u64,
    pub needs_review: u64,
    pub skipped: u64,
    pub deferred: u64,
    pub budget_dropped: u64,
    pub batches_sent: u64,
    pub spent_usd: f64,
}

impl AnalyzerOutcome {
    fn absorb(&mut self, other: &AnalyzerOutcome) {
        self.analyzed += other.analyzed;
        self.needs_review += other.needs_review;
        self.skipped += other.skipped;
        self.deferred += other.deferred;
        self.budget_dropped += other.budget_dropped;
        self.batches_sent += other.batches_sent;
    }
}

/// Batched LLM analysis with budget control and the retry/skip state machine.
pub struct LlmAnalyzer {
    config: AnalyzerConfig,
    transport: Arc<dyn LlmTransport>,
    budget: BudgetBucket,
    taxonomy: TaxonomyAdapter,
}

impl LlmAnalyzer {
    pub fn new(
        config: AnalyzerConfig,
        transport: Arc<dyn LlmTransport>,
        budget: BudgetBucket,
        taxonomy: TaxonomyAdapter,
    ) -> Self {
        Self {
            config,
            transport,
            budget,
            taxonomy,
        }
    }

    /// Analyze every pending signature of the current run.
    ///
    /// Only `status = active`, non-human-verified, unresolved signatures are
    /// fetched; of those, only the ones with statistics in this run are sent.
    pub async fn analyze_run(
        self: Arc<Self>,
        reader: &Reader,
        writer: &WriterHandle,
        run_stats: &HashMap<String, SignatureStats>,
        now: DateTime<Utc>,
    ) -> Result<AnalyzerOutcome> {
        if !self.config.enabled {
            return Err(AnalyzerError::Disabled);
        }

        let pending = reader.pending_for_llm(&now, self.config.pending_limit)?;
        let failure_counts: HashMap<String, u32> = pending
            .iter()
            .map(|record| (record.url_signature.clone(), record.failure_count))
            .collect();

        let items: Vec<PayloadItem> = pending
            .iter()
            .filter_map(|record| run_stats.get(&record.url_signature))
            .map(PayloadItem::from_stats)
            .collect();
        if items.is_empty() {
            return Ok(AnalyzerOutcome::default());
        }

        let batches = BatchPayload::chunk(items, self.config.max_batch_chars);
        let mut outcome = AnalyzerOutcome::default();
        let mut queue = batches.into_iter();

        loop {
            let mut join_set: JoinSet<Result<AnalyzerOutcome>> = JoinSet::new();
            for batch in queue.by_ref().take(self.config.concurrency.max(1)) {
                let analyzer = Arc::clone(&self);
                let writer = writer.clone();
                let failure_counts = failure_counts.clone();
                join_set.spawn(async move {
                    analyzer
                        .dispatch_batch(batch, &writer, &failure_counts, now)
                        .await
                });
            }
            if join_set.is_empty() {
                break;
            }
            while let Some(joined) = join_set.join_next().await {
                let batch_outcome =
                    joined.map_err(|err| AnalyzerError::Transport(err.to_string()))??;
                outcome.absorb(&batch_outcome);
            }
        }

        outcome.spent_usd = self.budget.spent_usd();
        Ok(outcome)
    }

    async fn dispatch_batch(
        &self,
        mut batch: BatchPayload,
        writer: &WriterHandle,
        failure_counts: &HashMap<String, u32>,
        now: DateTime<Utc>,
    ) -> Result<AnalyzerOutcome> {
        let mut outcome = AnalyzerOutcome::default();

        let estimated_cost = self.estimate_cost(&batch);
        if !self.budget.admit(estimated_cost, batch.has_priority()) {
            // Only C-only batches land here: priority batches always admit.
            outcome.budget_dropped += batch.shed_low_priority() as u64;
            return Ok(outcome);
        }

        let signatures: Vec<String> = batch.items.iter().map(|i| i.signature.clone()).collect();
        let mut error_context: Option<String> = None;

        for attempt in 0..self.config.max_schema_attempts {
            let prompt = batch.render_prompt(
                &self.config.pins.prompt_version,
                error_context.as_deref(),
            );
            outcome.batches_sent += 1;

            let response = match self.transport.complete(&prompt).await {
                Ok(response) => response,
                Err(client_error) => {
                    self.handle_transport_error(
                        &client_error,
                        &signatures,
                        writer,
                        failure_counts,
                        now,
                        &mut outcome,
                    )?;
                    return Ok(outcome);
                }
            };

            let total_tokens = response.input_tokens + response.output_tokens;
            self.budget
                .charge(total_tokens as f64 / 1000.0 * self.config.cost_per_1k_tokens_usd);

            match parse_and_validate(&response.body, &signatures, &self.taxonomy) {
                Ok(validated) => {
                    self.commit_verdicts(&validated, &signatures, writer, now, &mut outcome)?;
                    return Ok(outcome);
                }
                Err(reason) => {
                    log::warn!(
                        "batch schema violation (attempt {}): {reason}",
                        attempt + 1
                    );
                    error_context = Some(reason);
                }
            }
        }

        // Still invalid after the allowed attempts: the whole batch waits
        // for a person. needs_review is never resent automatically.
        for signature in &signatures {
            writer.enqueue(Intent::SetClassificationState {
                url_signature: signature.clone(),
                status: RecordStatus::NeedsReview,
                error_kind: Some(ErrorKind::SchemaViolation),
                error_reason: error_context.clone(),
                retry_after: None,
                failure_count: failure_counts.get(signature).copied().unwrap_or(0) + 1,
            })?;
        }
        outcome.needs_review += signatures.len() as u64;
        Ok(outcome)
    }

    fn handle_transport_error(
        &self,
        client_error: &ClientError,
        signatures: &[String],
        writer: &WriterHandle,
        failure_counts: &HashMap<String, u32>,
        now: DateTime<Utc>,
        outcome: &mut AnalyzerOutcome,
    ) -> Result<()> {
        if client_error.kind.is_permanent() {
            // Permanent: never retried, at any future instant.
            for signature in signatures {
                writer.enqueue(Intent::SetClassificationState {
                    url_signature: signature.clone(),
                    status: RecordStatus::Skipped,
                    error_kind: Some(client_error.kind),
                    error_reason: Some(client_error.reason.clone()),
                    retry_after: None,
                    failure_count: failure_counts.get(signature).copied().unwrap_or(0) + 1,
                })?;
            }
            outcome.skipped += signatures.len() as u64;
            return Ok(());
        }

        // Transient: stay active, honored on the next run via retry_after.
        for signature in signatures {
            let failures = failure_counts.get(signature).copied().unwrap_or(0) + 1;
            let retry_after = now + self.backoff(failures, client_error.retry_after_secs);
            writer.enqueue(Intent::SetClassificationState {
                url_signature: signature.clone(),
                status: RecordStatus::Active,
                error_kind: Some(client_error.kind),
                error_reason: Some(client_error.reason.clone()),
                retry_after: Some(retry_after),
                failure_count: failures,
            })?;
        }
        outcome.deferred += signatures.len() as u64;
        Ok(())
    }

    fn commit_verdicts(
        &self,
        validated: &[ValidatedItem],
        expected: &[String],
        writer: &WriterHandle,
        now: DateTime<Utc>,
        outcome: &mut AnalyzerOutcome,
    ) -> Result<()> {
        let mut covered: Vec<&str> = Vec::with_capacity(validated.len());
        for entry in validated {
            covered.push(entry.item.signature.as_str());
            let record = ClassificationRecord {
                url_signature: entry.item.signature.clone(),
                service_name: entry.item.service_name.clone(),
                usage_type: entry.item.usage_type.clone(),
                risk_level: entry.item.risk_level.clone(),
                category: entry.item.category.clone(),
                confidence: entry.item.confidence,
                rationale_short: entry.item.rationale_short.clone(),
                source: ClassificationSource::Llm,
                signature_version: self.config.pins.signature_scheme_version.clone(),
                rule_version: self.config.pins.rule_version.clone(),
                prompt_version: self.config.pins.prompt_version.clone(),
                taxonomy_version: self.config.pins.taxonomy_version.clone(),
                status: RecordStatus::Active,
                is_human_verified: false,
                taxonomy: entry.assignment.clone(),
                error_kind: None,
                error_reason: None,
                retry_after: None,
                failure_count: 0,
                analyzed_at: Some(now),
            };
            writer.enqueue(Intent::UpsertClassification(record))?;

            if entry.taxonomy_errors.is_empty() {
                outcome.analyzed += 1;
            } else {
                // Missing required dimensions downgrade to the human queue.
                writer.enqueue(Intent::SetClassificationState {
                    url_signature: entry.item.signature.clone(),
                    status: RecordStatus::NeedsReview,
                    error_kind: Some(ErrorKind::SchemaViolation),
                    error_reason: Some(entry.taxonomy_errors.join("; ")),
                    retry_after: None,
                    failure_count: 0,
                })?;
                outcome.needs_review += 1;
            }
        }

        // Signatures the model silently dropped wait for a person too.
        for signature in expected {
            if !covered.contains(&signature.as_str()) {
                writer.enqueue(Intent::SetClassificationState {
                    url_signature: signature.clone(),
                    status: RecordStatus::NeedsReview,
                    error_kind: Some(ErrorKind::SchemaViolation),
                    error_reason: Some("missing from model response".to_string()),
                    retry_after: None,
                    failure_count: 0,
                })?;
                outcome.needs_review += 1;
            }
        }
        Ok(())
    }

    fn estimate_cost(&self, batch: &BatchPayload) -> f64 {
        // Rough 4-chars-per-token input estimate plus assumed output size.
        let input_tokens = (batch.estimated_chars() / 4) as u64;
        let output_tokens =
            self.config.estimated_output_tokens_per_item * batch.items.len() as u64;
        (input_tokens + output_tokens) as f64 / 1000.0 * self.config.cost_per_1k_tokens_usd
    }

    /// Exponential backoff with jitter; a server-provided Retry-After wins.
    fn backoff(&self, failures: u32, server_retry_after_secs: Option<u64>) -> ChronoDuration {
        if let Some(secs) = server_retry_after_secs {
            return ChronoDuration::seconds(secs as i64);
        }
        let exponent = failures.saturating_sub(1).min(6);
        let base = self.config.base_backoff_secs.saturating_mul(1 << exponent);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.config.jitter_max_ms.max(1));
        ChronoDuration::seconds(base) + ChronoDuration::milliseconds(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TransportResponse;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use shadowscan_model::CandidateFlags;
    use shadowscan_store::Store;
    use std::sync::Mutex;

    struct ScriptedTransport {
        script: Mutex<Vec<std::result::Result<TransportResponse, ClientError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<std::result::Result<TransportResponse, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmTransport for ScriptedTransport {
        async fn complete(
            &self,
            prompt: &str,
        ) -> std::result::Result<TransportResponse, ClientError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                panic!("transport called more times than scripted");
            }
            script.remove(0)
        }
    }

    fn taxonomy() -> TaxonomyAdapter {
        TaxonomyAdapter::from_json(
            r#"{
                "version": "1.0",
                "dimensions": {
                    "FS": [{"code": "FS-GEN"}], "IM": [{"code": "IM-WEB"}],
                    "UC": [{"code": "UC-CHAT"}], "DT": [{"code": "DT-TEXT"}],
                    "CH": [{"code": "CH-SAAS"}], "RS": [{"code": "RS-EXFIL"}],
                    "EV": [{"code": "EV-PROXY"}], "OB": [{"code": "OB-PROD"}]
                }
            }"#,
        )
        .unwrap()
    }

    fn stats(signature: &str, flags: CandidateFlags) -> SignatureStats {
        let seen = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        SignatureStats {
            run_id: "run1".to_string(),
            url_signature: signature.to_string(),
            norm_host: "api.example.com".to_string(),
            norm_path_template: "/v1/chat?p=1".to_string(),
            dest_domain: "example.com".to_string(),
            bytes_sent_bucket: "L".to_string(),
            access_count: 3,
            unique_users: 1,
            bytes_sent_sum: 100,
            bytes_sent_max: 100,
            bytes_sent_p95: 100,
            bytes_received_sum: 0,
            burst_max_5min: 0,
            cumulative_user_domain_day_max: 0,
            flags,
            sampled: false,
            first_seen: seen,
            last_seen: seen,
        }
    }

    fn good_body(signature: &str) -> String {
        format!(
            r#"{{"classifications": [{{
                "signature": "{signature}", "service_name": "ChatGPT",
                "usage_type": "genai_web", "risk_level": "high", "category": "GenAI",
                "confidence": 0.9, "rationale_short": "chat endpoint",
                "taxonomy": {{"fs_code": "FS-GEN", "im_code": "IM-WEB",
                    "uc_codes": ["UC-CHAT"], "dt_codes": ["DT-TEXT"],
                    "ch_codes": ["CH-SAAS"], "rs_codes": ["RS-EXFIL"],
                    "ev_codes": ["EV-PROXY"], "ob_codes": []}}
            }}]}}"#
        )
    }

    fn response(body: String) -> TransportResponse {
        TransportResponse {
            body,
            input_tokens: 100,
            output_tokens: 50,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Store,
        writer: shadowscan_store::Writer,
        now: DateTime<Utc>,
    }

    fn fixture(signatures: &[&str]) -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("cache.db")).unwrap();
        let writer = store.spawn_writer().unwrap();
        let handle = writer.handle();
        for signature in signatures {
            let mut record = ClassificationRecord::pending(signature);
            record.category = "Unknown".to_string();
            handle.enqueue(Intent::UpsertClassification(record)).unwrap();
        }
        handle.flush().unwrap();
        Fixture {
            _dir: dir,
            store,
            writer,
            now: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    fn analyzer(
        transport: Arc<dyn LlmTransport>,
        daily_budget: f64,
    ) -> Arc<LlmAnalyzer> {
        Arc::new(LlmAnalyzer::new(
            AnalyzerConfig::default(),
            transport,
            BudgetBucket::new(daily_budget),
            taxonomy(),
        ))
    }

    #[tokio::test]
    async fn valid_response_caches_the_verdict() {
        let fx = fixture(&["sig1"]);
        let transport = ScriptedTransport::new(vec![Ok(response(good_body("sig1")))]);
        let analyzer = analyzer(transport, 10.0);

        let mut run_stats = HashMap::new();
        run_stats.insert("sig1".to_string(), stats("sig1", CandidateFlags::default()));

        let reader = fx.store.reader().unwrap();
        let outcome = analyzer
            .analyze_run(&reader, &fx.writer.handle(), &run_stats, fx.now)
            .await
            .unwrap();
        fx.writer.handle().flush().unwrap();

        assert_eq!(outcome.analyzed, 1);
        let record = reader.get_classification("sig1").unwrap().unwrap();
        assert_eq!(record.service_name, "ChatGPT");
        assert_eq!(record.source, ClassificationSource::Llm);
        assert_eq!(record.status, RecordStatus::Active);
        assert!(record.analyzed_at.is_some());
        // Resolved signatures leave the pending view.
        assert!(reader.pending_for_llm(&fx.now, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn schema_violation_retries_once_then_queues_review() {
        let fx = fixture(&["sig1"]);
        let transport = ScriptedTransport::new(vec![
            Ok(response("not json at all".to_string())),
            Ok(response("still { not json".to_string())),
        ]);
        let analyzer = analyzer(Arc::clone(&transport) as Arc<dyn LlmTransport>, 10.0);

        let mut run_stats = HashMap::new();
        run_stats.insert("sig1".to_string(), stats("sig1", CandidateFlags::default()));

        let reader = fx.store.reader().unwrap();
        let outcome = analyzer
            .analyze_run(&reader, &fx.writer.handle(), &run_stats, fx.now)
            .await
            .unwrap();
        fx.writer.handle().flush().unwrap();

        assert_eq!(outcome.needs_review, 1);
        assert_eq!(outcome.batches_sent, 2);
        // The retry prompt carried the error context.
        let prompts = transport.prompts.lock().unwrap();
        assert!(prompts[1].contains("previous answer was rejected"));

        let record = reader.get_classification("sig1").unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::NeedsReview);
        assert_eq!(record.error_kind, Some(ErrorKind::SchemaViolation));
    }

    #[tokio::test]
    async fn permanent_error_skips_forever() {
        let fx = fixture(&["sig1"]);
        let transport = ScriptedTransport::new(vec![Err(ClientError {
            kind: ErrorKind::ContextLengthExceeded,
            reason: "prompt exceeds context".to_string(),
            retry_after_secs: None,
        })]);
        let analyzer = analyzer(transport, 10.0);

        let mut run_stats = HashMap::new();
        run_stats.insert("sig1".to_string(), stats("sig1", CandidateFlags::default()));

        let reader = fx.store.reader().unwrap();
        let outcome = analyzer
            .analyze_run(&reader, &fx.writer.handle(), &run_stats, fx.now)
            .await
            .unwrap();
        fx.writer.handle().flush().unwrap();

        assert_eq!(outcome.skipped, 1);
        let record = reader.get_classification("sig1").unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Skipped);
        assert_eq!(record.error_kind, Some(ErrorKind::ContextLengthExceeded));
        // Absent from the pending view at any future instant.
        let future = Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap();
        assert!(reader.pending_for_llm(&future, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_error_sets_retry_after_and_stays_active() {
        let fx = fixture(&["sig1"]);
        let transport = ScriptedTransport::new(vec![Err(ClientError {
            kind: ErrorKind::RateLimit,
            reason: "429".to_string(),
            retry_after_secs: Some(600),
        })]);
        let analyzer = analyzer(transport, 10.0);

        let mut run_stats = HashMap::new();
        run_stats.insert("sig1".to_string(), stats("sig1", CandidateFlags::default()));

        let reader = fx.store.reader().unwrap();
        let outcome = analyzer
            .analyze_run(&reader, &fx.writer.handle(), &run_stats, fx.now)
            .await
            .unwrap();
        fx.writer.handle().flush().unwrap();

        assert_eq!(outcome.deferred, 1);
        let record = reader.get_classification("sig1").unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Active);
        assert_eq!(record.failure_count, 1);
        // Server Retry-After honored exactly.
        assert_eq!(
            record.retry_after.unwrap(),
            fx.now + ChronoDuration::seconds(600)
        );
        // Not pending now, pending again after the mark.
        assert!(reader.pending_for_llm(&fx.now, 10).unwrap().is_empty());
        let later = fx.now + ChronoDuration::seconds(700);
        assert_eq!(reader.pending_for_llm(&later, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_drops_coverage_batches() {
        let fx = fixture(&["c_only"]);
        // Transport must never be called.
        let transport = ScriptedTransport::new(vec![]);
        let analyzer = analyzer(transport, 0.0);

        let c_flags = CandidateFlags {
            c: true,
            sampled: true,
            ..Default::default()
        };
        let mut run_stats = HashMap::new();
        run_stats.insert("c_only".to_string(), stats("c_only", c_flags));

        let reader = fx.store.reader().unwrap();
        let outcome = analyzer
            .analyze_run(&reader, &fx.writer.handle(), &run_stats, fx.now)
            .await
            .unwrap();
        assert_eq!(outcome.budget_dropped, 1);
        assert_eq!(outcome.batches_sent, 0);
    }

    #[tokio::test]
    async fn priority_batches_ignore_budget_exhaustion() {
        let fx = fixture(&["a_sig"]);
        let transport = ScriptedTransport::new(vec![Ok(response(good_body("a_sig")))]);
        let analyzer = analyzer(transport, 0.0);

        let a_flags = CandidateFlags {
            a: true,
            ..Default::default()
        };
        let mut run_stats = HashMap::new();
        run_stats.insert("a_sig".to_string(), stats("a_sig", a_flags));

        let reader = fx.store.reader().unwrap();
        let outcome = analyzer
            .analyze_run(&reader, &fx.writer.handle(), &run_stats, fx.now)
            .await
            .unwrap();
        assert_eq!(outcome.analyzed, 1);
    }

    #[tokio::test]
    async fn disabled_analyzer_refuses_dispatch() {
        let fx = fixture(&["sig1"]);
        let transport = ScriptedTransport::new(vec![]);
        let analyzer = Arc::new(LlmAnalyzer::new(
            AnalyzerConfig {
                enabled: false,
                ..Default::default()
            },
            transport,
            BudgetBucket::new(10.0),
            taxonomy(),
        ));
        let reader = fx.store.reader().unwrap();
        let err = analyzer
            .analyze_run(&reader, &fx.writer.handle(), &HashMap::new(), fx.now)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::Disabled));
    }

    #[tokio::test]
    async fn no_pii_reaches_the_prompt() {
        let fx = fixture(&["sig1"]);
        let transport = ScriptedTransport::new(vec![Ok(response(good_body("sig1")))]);
        let analyzer = analyzer(Arc::clone(&transport) as Arc<dyn LlmTransport>, 10.0);

        let mut run_stats = HashMap::new();
        run_stats.insert("sig1".to_string(), stats("sig1", CandidateFlags::default()));

        let reader = fx.store.reader().unwrap();
        analyzer
            .analyze_run(&reader, &fx.writer.handle(), &run_stats, fx.now)
            .await
            .unwrap();

        let prompts = transport.prompts.lock().unwrap();
        for prompt in prompts.iter() {
            for forbidden in ["user_id", "src_ip", "device_id", "10.0.0."] {
                assert!(
                    !prompt.contains(forbidden),
                    "prompt leaked {forbidden}: {prompt}"
                );
            }
        }
    }
}
