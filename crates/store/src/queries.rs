use crate::{Result, StoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use shadowscan_model::{
    CandidateFlags, ClassificationRecord, ClassificationSource, ErrorKind, RecordStatus,
    RunRecord, RunStatus, SignatureStats, TaxonomyAssignment, VersionPins,
};
use std::path::Path;
use std::time::Duration;

/// Timestamps are stored as RFC 3339 with microsecond precision so equal
/// instants always render equal bytes.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str, table: &'static str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StoreError::CorruptRow {
            table,
            reason: format!("bad timestamp {raw:?}: {err}"),
        })
}

/// Registry row for one ingested input file.
#[derive(Debug, Clone)]
pub struct InputFileRow {
    pub file_id: String,
    pub run_id: String,
    pub file_path: String,
    pub file_size: u64,
    pub file_hash: String,
    pub vendor: String,
    pub min_time: Option<DateTime<Utc>>,
    pub max_time: Option<DateTime<Utc>>,
    pub row_count: u64,
    pub parse_error_count: u64,
    pub ingested_at: DateTime<Utc>,
}

/// Read-only store handle. Safe to hold in any worker; never writes.
pub struct Reader {
    conn: Connection,
}

impl Reader {
    pub(crate) fn open(db_path: &Path) -> Result<Reader> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "query_only", "ON")?;
        Ok(Reader { conn })
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.conn
            .query_row(
                "SELECT run_id, run_key, started_at, finished_at, status, \
                 last_completed_stage, input_manifest_hash, range_start, range_end, \
                 signature_version, rule_version, prompt_version, taxonomy_version, \
                 taxonomy_artifact_hash, engine_spec_version, total_events, \
                 unique_signatures, cache_hit_count, llm_sent_count \
                 FROM runs WHERE run_id = ?1",
                [run_id],
                run_from_row,
            )
            .optional()?
            .transpose()
    }

    pub fn get_classification(&self, url_signature: &str) -> Result<Option<ClassificationRecord>> {
        self.conn
            .query_row(
                &format!("{CLASSIFICATION_SELECT} WHERE url_signature = ?1"),
                [url_signature],
                classification_from_row,
            )
            .optional()?
            .transpose()
    }

    /// Signatures eligible for LLM analysis: `active`, not human-verified,
    /// still unresolved (unknown category), and past any retry-after mark.
    /// `skipped` and `needs_review` rows never appear here.
    pub fn pending_for_llm(
        &self,
        now: &DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ClassificationRecord>> {
        let mut statement = self.conn.prepare(&format!(
            "{CLASSIFICATION_SELECT} \
             WHERE status = 'active' AND is_human_verified = 0 \
             AND (category = 'Unknown' OR service_name = '') \
             AND (retry_after IS NULL OR retry_after <= ?1) \
             ORDER BY url_signature LIMIT ?2"
        ))?;
        let rows = statement.query_map(params![format_ts(now), limit as i64], |row| {
            classification_from_row(row)
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    pub fn stats_for_run(&self, run_id: &str) -> Result<Vec<SignatureStats>> {
        let mut statement = self.conn.prepare(
            "SELECT run_id, url_signature, norm_host, norm_path_template, dest_domain, \
             bytes_sent_bucket, access_count, unique_users, bytes_sent_sum, bytes_sent_max, \
             bytes_sent_p95, bytes_received_sum, burst_max_5min, \
             cumulative_user_domain_day_max, candidate_flags, sampled, first_seen, last_seen \
             FROM signature_stats WHERE run_id = ?1 ORDER BY url_signature",
        )?;
        let rows = statement.query_map([run_id], stats_from_row)?;
        let mut stats = Vec::new();
        for row in rows {
            stats.push(row??);
        }
        Ok(stats)
    }

    pub fn input_files_for_run(&self, run_id: &str) -> Result<Vec<InputFileRow>> {
        let mut statement = self.conn.prepare(
            "SELECT file_id, run_id, file_path, file_size, file_hash, vendor, min_time, \
             max_time, row_count, parse_error_count, ingested_at \
             FROM input_files WHERE run_id = ?1 \
             ORDER BY file_hash, vendor, min_time, max_time",
        )?;
        let rows = statement.query_map([run_id], input_file_from_row)?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row??);
        }
        Ok(files)
    }

    pub fn count_rows(&self, table: &str) -> Result<u64> {
        // Table names come from code, never from input.
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
        Ok(count as u64)
    }

    pub fn pii_audit_count(&self, run_id: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pii_audit WHERE run_id = ?1",
            [run_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn metrics_for_run(&self, run_id: &str) -> Result<Vec<(String, f64)>> {
        let mut statement = self.conn.prepare(
            "SELECT name, value FROM run_metrics WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = statement.query_map([run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(row?);
        }
        Ok(metrics)
    }
}

const CLASSIFICATION_SELECT: &str =
    "SELECT url_signature, service_name, usage_type, risk_level, category, confidence, \
     rationale_short, classification_source, signature_version, rule_version, \
     prompt_version, taxonomy_version, status, is_human_verified, fs_code, im_code, \
     uc_codes_json, dt_codes_json, ch_codes_json, rs_codes_json, ev_codes_json, \
     ob_codes_json, error_kind, error_reason, retry_after, failure_count, analyzed_at \
     FROM analysis_cache";

type RowResult<T> = rusqlite::Result<Result<T>>;

fn run_from_row(row: &Row<'_>) -> RowResult<RunRecord> {
    let started_at: String = row.get(2)?;
    let finished_at: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    Ok((|| {
        Ok(RunRecord {
            run_id: row.get(0)?,
            run_key: row.get(1)?,
            started_at: parse_ts(&started_at, "runs")?,
            finished_at: finished_at
                .as_deref()
                .map(|raw| parse_ts(raw, "runs"))
                .transpose()?,
            status: RunStatus::parse(&status).ok_or(StoreError::CorruptRow {
                table: "runs",
                reason: format!("unknown status {status:?}"),
            })?,
            last_completed_stage: row.get(5)?,
            input_manifest_hash: row.get(6)?,
            range_start: row.get(7)?,
            range_end: row.get(8)?,
            pins: VersionPins {
                signature_scheme_version: row.get(9)?,
                rule_version: row.get(10)?,
                prompt_version: row.get(11)?,
                taxonomy_version: row.get(12)?,
                taxonomy_artifact_hash: row.get(13)?,
                engine_spec_version: row.get(14)?,
            },
            total_events: row.get::<_, i64>(15)? as u64,
            unique_signatures: row.get::<_, i64>(16)? as u64,
            cache_hit_count: row.get::<_, i64>(17)? as u64,
            llm_sent_count: row.get::<_, i64>(18)? as u64,
        })
    })())
}

fn classification_from_row(row: &Row<'_>) -> RowResult<ClassificationRecord> {
    let source: String = row.get(7)?;
    let status: String = row.get(12)?;
    let uc: String = row.get(16)?;
    let dt: String = row.get(17)?;
    let ch: String = row.get(18)?;
    let rs: String = row.get(19)?;
    let ev: String = row.get(20)?;
    let ob: String = row.get(21)?;
    let error_kind: Option<String> = row.get(22)?;
    let retry_after: Option<String> = row.get(24)?;
    let analyzed_at: Option<String> = row.get(26)?;
    let record = (|| {
        let parse_codes = |raw: &str| -> Result<Vec<String>> {
            serde_json::from_str(raw).map_err(|err| StoreError::CorruptRow {
                table: "analysis_cache",
                reason: format!("bad taxonomy array {raw:?}: {err}"),
            })
        };
        Ok(ClassificationRecord {
            url_signature: row.get(0)?,
            service_name: row.get(1)?,
            usage_type: row.get(2)?,
            risk_level: row.get(3)?,
            category: row.get(4)?,
            confidence: row.get(5)?,
            rationale_short: row.get(6)?,
            source: ClassificationSource::parse(&source).ok_or(StoreError::CorruptRow {
                table: "analysis_cache",
                reason: format!("unknown source {source:?}"),
            })?,
            signature_version: row.get(8)?,
            rule_version: row.get(9)?,
            prompt_version: row.get(10)?,
            taxonomy_version: row.get(11)?,
            status: RecordStatus::parse(&status).ok_or(StoreError::CorruptRow {
                table: "analysis_cache",
                reason: format!("unknown status {status:?}"),
            })?,
            is_human_verified: row.get(13)?,
            taxonomy: TaxonomyAssignment {
                fs_code: row.get(14)?,
                im_code: row.get(15)?,
                uc_codes: parse_codes(&uc)?,
                dt_codes: parse_codes(&dt)?,
                ch_codes: parse_codes(&ch)?,
                rs_codes: parse_codes(&rs)?,
                ev_codes: parse_codes(&ev)?,
                ob_codes: parse_codes(&ob)?,
            },
            error_kind: error_kind.as_deref().and_then(ErrorKind::parse),
            error_reason: row.get(23)?,
            retry_after: retry_after
                .as_deref()
                .map(|raw| parse_ts(raw, "analysis_cache"))
                .transpose()?,
            failure_count: row.get(25)?,
            analyzed_at: analyzed_at
                .as_deref()
                .map(|raw| parse_ts(raw, "analysis_cache"))
                .transpose()?,
        })
    })();
    Ok(record)
}

fn stats_from_row(row: &Row<'_>) -> RowResult<SignatureStats> {
    let flags: Option<String> = row.get(14)?;
    let first_seen: String = row.get(16)?;
    let last_seen: String = row.get(17)?;
    Ok((|| {
        Ok(SignatureStats {
            run_id: row.get(0)?,
            url_signature: row.get(1)?,
            norm_host: row.get(2)?,
            norm_path_template: row.get(3)?,
            dest_domain: row.get(4)?,
            bytes_sent_bucket: row.get(5)?,
            access_count: row.get::<_, i64>(6)? as u64,
            unique_users: row.get::<_, i64>(7)? as u64,
            bytes_sent_sum: row.get::<_, i64>(8)? as u64,
            bytes_sent_max: row.get::<_, i64>(9)? as u64,
            bytes_sent_p95: row.get::<_, i64>(10)? as u64,
            bytes_received_sum: row.get::<_, i64>(11)? as u64,
            burst_max_5min: row.get::<_, i64>(12)? as u64,
            cumulative_user_domain_day_max: row.get::<_, i64>(13)? as u64,
            flags: flags.as_deref().map(CandidateFlags::parse).unwrap_or_default(),
            sampled: row.get(15)?,
            first_seen: parse_ts(&first_seen, "signature_stats")?,
            last_seen: parse_ts(&last_seen, "signature_stats")?,
        })
    })())
}

fn input_file_from_row(row: &Row<'_>) -> RowResult<InputFileRow> {
    let min_time: Option<String> = row.get(6)?;
    let max_time: Option<String> = row.get(7)?;
    let ingested_at: String = row.get(10)?;
    Ok((|| {
        Ok(InputFileRow {
            file_id: row.get(0)?,
            run_id: row.get(1)?,
            file_path: row.get(2)?,
            file_size: row.get::<_, i64>(3)? as u64,
            file_hash: row.get(4)?,
            vendor: row.get(5)?,
            min_time: min_time
                .as_deref()
                .map(|raw| parse_ts(raw, "input_files"))
                .transpose()?,
            max_time: max_time
                .as_deref()
                .map(|raw| parse_ts(raw, "input_files"))
                .transpose()?,
            row_count: row.get::<_, i64>(8)? as u64,
            parse_error_count: row.get::<_, i64>(9)? as u64,
            ingested_at: parse_ts(&ingested_at, "input_files")?,
        })
    })())
}
