use crate::contract::{excluded_columns, update_clause};
use crate::queries::{format_ts, InputFileRow};
use crate::{Result, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use shadowscan_model::{
    ClassificationRecord, ErrorKind, PiiAuditRecord, RecordStatus, RunRecord, RunStatus,
    SignatureStats,
};
use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;

const QUEUE_DEPTH: usize = 1024;
const BATCH_MAX: usize = 64;
const BATCH_TIMEOUT: Duration = Duration::from_secs(1);

/// One mutation intent. Producers enqueue without blocking on database I/O;
/// the writer applies the UPSERT contract and commits in batches.
#[derive(Debug, Clone)]
pub enum Intent {
    UpsertRun(RunRecord),
    UpsertStats(SignatureStats),
    UpsertClassification(ClassificationRecord),
    UpsertInputFile(InputFileRow),
    /// Orchestrator-only: advance the stage checkpoint.
    Checkpoint {
        run_id: String,
        stage: u32,
        status: RunStatus,
    },
    /// Orchestrator-only: terminal transition.
    FinalizeRun {
        run_id: String,
        status: RunStatus,
        finished_at: DateTime<Utc>,
    },
    UpdateRunCounters {
        run_id: String,
        total_events: u64,
        unique_signatures: u64,
        cache_hit_count: u64,
        llm_sent_count: u64,
    },
    /// Analyzer state machine transition; respects human-verified protection.
    SetClassificationState {
        url_signature: String,
        status: RecordStatus,
        error_kind: Option<ErrorKind>,
        error_reason: Option<String>,
        retry_after: Option<DateTime<Utc>>,
        failure_count: u32,
    },
    AppendPiiAudit(PiiAuditRecord),
    RecordMetric {
        run_id: String,
        name: String,
        value: f64,
        recorded_at: DateTime<Utc>,
    },
}

enum Message {
    Intent(Box<Intent>),
    Flush(SyncSender<()>),
    Shutdown,
}

/// Clonable producer side of the writer queue. After shutdown, every send
/// fails with [`StoreError::WriterClosed`]; the orchestrator maps that to a
/// `partial` run.
#[derive(Clone)]
pub struct WriterHandle {
    sender: SyncSender<Message>,
}

impl WriterHandle {
    pub fn enqueue(&self, intent: Intent) -> Result<()> {
        self.sender
            .send(Message::Intent(Box::new(intent)))
            .map_err(|_| StoreError::WriterClosed)
    }

    /// Block until every intent enqueued before this call is committed.
    pub fn flush(&self) -> Result<()> {
        let (ack, done) = sync_channel(1);
        self.sender
            .send(Message::Flush(ack))
            .map_err(|_| StoreError::WriterClosed)?;
        done.recv().map_err(|_| StoreError::WriterClosed)
    }
}

/// The single writer task. Owns the write connection for its lifetime.
pub struct Writer {
    handle: WriterHandle,
    join: Option<thread::JoinHandle<()>>,
}

impl Writer {
    pub(crate) fn spawn(db_path: &Path) -> Result<Writer> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let (sender, receiver) = sync_channel::<Message>(QUEUE_DEPTH);
        let join = thread::Builder::new()
            .name("store-writer".to_string())
            .spawn(move || writer_loop(conn, receiver))?;

        Ok(Writer {
            handle: WriterHandle { sender },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    /// Flush and stop. Producers holding handles receive send errors from
    /// this point on.
    pub fn shutdown(mut self) -> Result<()> {
        let _ = self.handle.sender.send(Message::Shutdown);
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| StoreError::WriterClosed)?;
        }
        Ok(())
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.handle.sender.send(Message::Shutdown);
            let _ = join.join();
        }
    }
}

fn writer_loop(conn: Connection, receiver: Receiver<Message>) {
    let mut batch: Vec<Intent> = Vec::with_capacity(BATCH_MAX);
    loop {
        match receiver.recv_timeout(BATCH_TIMEOUT) {
            Ok(Message::Intent(intent)) => {
                batch.push(*intent);
                if batch.len() >= BATCH_MAX {
                    apply_batch(&conn, &mut batch);
                }
            }
            Ok(Message::Flush(ack)) => {
                apply_batch(&conn, &mut batch);
                let _ = ack.send(());
            }
            Ok(Message::Shutdown) => {
                apply_batch(&conn, &mut batch);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                apply_batch(&conn, &mut batch);
            }
            Err(RecvTimeoutError::Disconnected) => {
                apply_batch(&conn, &mut batch);
                break;
            }
        }
    }
}

/// Dedup on the conflict key (last occurrence wins), then apply the batch in
/// one transaction. Item-level failures are logged and skipped so one bad
/// record cannot wedge the queue.
fn apply_batch(conn: &Connection, batch: &mut Vec<Intent>) {
    if batch.is_empty() {
        return;
    }
    let deduped = dedup_batch(std::mem::take(batch));

    if let Err(err) = conn.execute_batch("BEGIN IMMEDIATE") {
        log::error!("writer: cannot begin transaction: {err}");
        return;
    }
    let mut applied = 0usize;
    for intent in &deduped {
        match apply_intent(conn, intent) {
            Ok(()) => applied += 1,
            Err(err) => log::warn!("writer: intent failed, continuing: {err}"),
        }
    }
    if let Err(err) = conn.execute_batch("COMMIT") {
        log::error!("writer: commit failed, rolling back: {err}");
        let _ = conn.execute_batch("ROLLBACK");
    } else {
        log::debug!("writer: committed {applied}/{} intents", deduped.len());
    }
}

/// Same-batch duplicates on a conflict key keep only the last occurrence:
/// the most recent intent is the current intent.
fn dedup_batch(batch: Vec<Intent>) -> Vec<Intent> {
    fn key(intent: &Intent) -> Option<(&'static str, String)> {
        match intent {
            Intent::UpsertRun(run) => Some(("runs", run.run_id.clone())),
            Intent::UpsertStats(stats) => Some((
                "signature_stats",
                format!("{}|{}", stats.run_id, stats.url_signature),
            )),
            Intent::UpsertClassification(record) => {
                Some(("analysis_cache", record.url_signature.clone()))
            }
            Intent::UpsertInputFile(row) => Some(("input_files", row.file_id.clone())),
            _ => None,
        }
    }

    let mut last_index: std::collections::HashMap<(&'static str, String), usize> =
        std::collections::HashMap::new();
    for (index, intent) in batch.iter().enumerate() {
        if let Some(k) = key(intent) {
            last_index.insert(k, index);
        }
    }
    batch
        .into_iter()
        .enumerate()
        .filter(|(index, intent)| match key(intent) {
            Some(k) => last_index.get(&k) == Some(index),
            None => true,
        })
        .map(|(_, intent)| intent)
        .collect()
}

fn human_verified(conn: &Connection, url_signature: &str) -> rusqlite::Result<Option<bool>> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT is_human_verified FROM analysis_cache WHERE url_signature = ?1",
        [url_signature],
        |row| row.get::<_, bool>(0),
    )
    .optional()
}

fn apply_intent(conn: &Connection, intent: &Intent) -> Result<()> {
    match intent {
        Intent::UpsertRun(run) => upsert_run(conn, run),
        Intent::UpsertStats(stats) => upsert_stats(conn, stats),
        Intent::UpsertClassification(record) => upsert_classification(conn, record),
        Intent::UpsertInputFile(row) => upsert_input_file(conn, row),
        Intent::Checkpoint {
            run_id,
            stage,
            status,
        } => {
            conn.execute(
                "UPDATE runs SET last_completed_stage = ?1, status = ?2 WHERE run_id = ?3",
                params![stage, status.as_str(), run_id],
            )?;
            Ok(())
        }
        Intent::FinalizeRun {
            run_id,
            status,
            finished_at,
        } => {
            conn.execute(
                "UPDATE runs SET status = ?1, finished_at = ?2 WHERE run_id = ?3",
                params![status.as_str(), format_ts(finished_at), run_id],
            )?;
            Ok(())
        }
        Intent::UpdateRunCounters {
            run_id,
            total_events,
            unique_signatures,
            cache_hit_count,
            llm_sent_count,
        } => {
            conn.execute(
                "UPDATE runs SET total_events = ?1, unique_signatures = ?2, \
                 cache_hit_count = ?3, llm_sent_count = ?4 WHERE run_id = ?5",
                params![
                    *total_events as i64,
                    *unique_signatures as i64,
                    *cache_hit_count as i64,
                    *llm_sent_count as i64,
                    run_id
                ],
            )?;
            Ok(())
        }
        Intent::SetClassificationState {
            url_signature,
            status,
            error_kind,
            error_reason,
            retry_after,
            failure_count,
        } => {
            if human_verified(conn, url_signature)? == Some(true) {
                log::warn!(
                    "skipping state change for {url_signature}: human-verified protection"
                );
                return Ok(());
            }
            conn.execute(
                "UPDATE analysis_cache SET status = ?1, error_kind = ?2, error_reason = ?3, \
                 retry_after = ?4, failure_count = ?5, updated_at = ?6 WHERE url_signature = ?7",
                params![
                    status.as_str(),
                    error_kind.as_ref().map(|k| k.as_str()),
                    error_reason,
                    retry_after.as_ref().map(format_ts),
                    failure_count,
                    format_ts(&Utc::now()),
                    url_signature
                ],
            )?;
            Ok(())
        }
        Intent::AppendPiiAudit(record) => {
            conn.execute(
                "INSERT INTO pii_audit (run_id, url_signature, kind, field_source, \
                 redaction_token, original_hash, occurrence_count) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.run_id,
                    record.url_signature,
                    record.kind.as_str(),
                    record.field_source,
                    record.redaction_token,
                    record.original_hash,
                    record.occurrence_count
                ],
            )?;
            Ok(())
        }
        Intent::RecordMetric {
            run_id,
            name,
            value,
            recorded_at,
        } => {
            conn.execute(
                "INSERT INTO run_metrics (run_id, name, value, recorded_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![run_id, name, value, format_ts(recorded_at)],
            )?;
            Ok(())
        }
    }
}

fn upsert_run(conn: &Connection, run: &RunRecord) -> Result<()> {
    log_exclusions("runs");
    conn.execute(
        &format!(
            "INSERT INTO runs (run_id, run_key, started_at, finished_at, status, \
             last_completed_stage, input_manifest_hash, range_start, range_end, \
             signature_version, rule_version, prompt_version, taxonomy_version, \
             taxonomy_artifact_hash, engine_spec_version, total_events, \
             unique_signatures, cache_hit_count, llm_sent_count) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
             ?16, ?17, ?18, ?19) \
             ON CONFLICT (run_id) DO UPDATE SET {}",
            update_clause("runs")
        ),
        params![
            run.run_id,
            run.run_key,
            format_ts(&run.started_at),
            run.finished_at.as_ref().map(format_ts),
            run.status.as_str(),
            run.last_completed_stage,
            run.input_manifest_hash,
            run.range_start,
            run.range_end,
            run.pins.signature_scheme_version,
            run.pins.rule_version,
            run.pins.prompt_version,
            run.pins.taxonomy_version,
            run.pins.taxonomy_artifact_hash,
            run.pins.engine_spec_version,
            run.total_events as i64,
            run.unique_signatures as i64,
            run.cache_hit_count as i64,
            run.llm_sent_count as i64
        ],
    )?;
    Ok(())
}

fn upsert_stats(conn: &Connection, stats: &SignatureStats) -> Result<()> {
    log_exclusions("signature_stats");
    conn.execute(
        &format!(
            "INSERT INTO signature_stats (run_id, url_signature, norm_host, \
             norm_path_template, dest_domain, bytes_sent_bucket, access_count, \
             unique_users, bytes_sent_sum, bytes_sent_max, bytes_sent_p95, \
             bytes_received_sum, burst_max_5min, cumulative_user_domain_day_max, \
             candidate_flags, sampled, first_seen, last_seen) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
             ?16, ?17, ?18) \
             ON CONFLICT (run_id, url_signature) DO UPDATE SET {}",
            update_clause("signature_stats")
        ),
        params![
            stats.run_id,
            stats.url_signature,
            stats.norm_host,
            stats.norm_path_template,
            stats.dest_domain,
            stats.bytes_sent_bucket,
            stats.access_count as i64,
            stats.unique_users as i64,
            stats.bytes_sent_sum as i64,
            stats.bytes_sent_max as i64,
            stats.bytes_sent_p95 as i64,
            stats.bytes_received_sum as i64,
            stats.burst_max_5min as i64,
            stats.cumulative_user_domain_day_max as i64,
            stats.flags.render(),
            stats.sampled,
            format_ts(&stats.first_seen),
            format_ts(&stats.last_seen)
        ],
    )?;
    Ok(())
}

fn upsert_classification(conn: &Connection, record: &ClassificationRecord) -> Result<()> {
    // Human-verification protection: the operation succeeds with no mutation.
    if human_verified(conn, &record.url_signature)? == Some(true) {
        log::warn!(
            "skipping UPSERT for {} (human-verified protection): attempted source={} service={:?}",
            record.url_signature,
            record.source.as_str(),
            record.service_name
        );
        return Ok(());
    }
    log_exclusions("analysis_cache");
    let now = format_ts(&Utc::now());
    conn.execute(
        &format!(
            "INSERT INTO analysis_cache (url_signature, service_name, usage_type, \
             risk_level, category, confidence, rationale_short, classification_source, \
             signature_version, rule_version, prompt_version, taxonomy_version, status, \
             is_human_verified, fs_code, im_code, uc_codes_json, dt_codes_json, \
             ch_codes_json, rs_codes_json, ev_codes_json, ob_codes_json, error_kind, \
             error_reason, retry_after, failure_count, analyzed_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
             ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29) \
             ON CONFLICT (url_signature) DO UPDATE SET {}",
            update_clause("analysis_cache")
        ),
        params![
            record.url_signature,
            record.service_name,
            record.usage_type,
            record.risk_level,
            record.category,
            record.confidence,
            record.rationale_short,
            record.source.as_str(),
            record.signature_version,
            record.rule_version,
            record.prompt_version,
            record.taxonomy_version,
            record.status.as_str(),
            record.is_human_verified,
            record.taxonomy.fs_code,
            record.taxonomy.im_code,
            serde_json::to_string(&record.taxonomy.uc_codes)?,
            serde_json::to_string(&record.taxonomy.dt_codes)?,
            serde_json::to_string(&record.taxonomy.ch_codes)?,
            serde_json::to_string(&record.taxonomy.rs_codes)?,
            serde_json::to_string(&record.taxonomy.ev_codes)?,
            serde_json::to_string(&record.taxonomy.ob_codes)?,
            record.error_kind.map(|k| k.as_str()),
            record.error_reason,
            record.retry_after.as_ref().map(format_ts),
            record.failure_count,
            record.analyzed_at.as_ref().map(format_ts),
            now,
            now
        ],
    )?;
    Ok(())
}

fn upsert_input_file(conn: &Connection, row: &InputFileRow) -> Result<()> {
    log_exclusions("input_files");
    conn.execute(
        &format!(
            "INSERT INTO input_files (file_id, run_id, file_path, file_size, file_hash, \
             vendor, min_time, max_time, row_count, parse_error_count, ingested_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT (file_id) DO UPDATE SET {}",
            update_clause("input_files")
        ),
        params![
            row.file_id,
            row.run_id,
            row.file_path,
            row.file_size as i64,
            row.file_hash,
            row.vendor,
            row.min_time.as_ref().map(format_ts),
            row.max_time.as_ref().map(format_ts),
            row.row_count as i64,
            row.parse_error_count as i64,
            format_ts(&row.ingested_at)
        ],
    )?;
    Ok(())
}

fn log_exclusions(table: &str) {
    let excluded = excluded_columns(table);
    if !excluded.is_empty() {
        log::debug!("UPSERT {table}: columns excluded from update set: {excluded:?}");
    }
}
