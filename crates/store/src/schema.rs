use crate::{Result, StoreError};
use rusqlite::Connection;

pub(crate) const SCHEMA_VERSION: i64 = 1;

/// Idempotent migrations, applied on every open. A failure here is fatal to
/// the run.
pub(crate) fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            run_key TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL DEFAULT 'running',
            last_completed_stage INTEGER NOT NULL DEFAULT 0,
            input_manifest_hash TEXT NOT NULL DEFAULT '',
            range_start TEXT,
            range_end TEXT,
            signature_version TEXT NOT NULL DEFAULT '',
            rule_version TEXT NOT NULL DEFAULT '',
            prompt_version TEXT NOT NULL DEFAULT '',
            taxonomy_version TEXT NOT NULL DEFAULT '',
            taxonomy_artifact_hash TEXT NOT NULL DEFAULT '',
            engine_spec_version TEXT NOT NULL DEFAULT '',
            psl_hash TEXT NOT NULL DEFAULT '',
            total_events INTEGER NOT NULL DEFAULT 0,
            unique_signatures INTEGER NOT NULL DEFAULT 0,
            cache_hit_count INTEGER NOT NULL DEFAULT 0,
            llm_sent_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);

        CREATE TABLE IF NOT EXISTS signature_stats (
            run_id TEXT NOT NULL,
            url_signature TEXT NOT NULL,
            norm_host TEXT NOT NULL DEFAULT '',
            norm_path_template TEXT NOT NULL DEFAULT '',
            dest_domain TEXT NOT NULL DEFAULT '',
            bytes_sent_bucket TEXT NOT NULL DEFAULT '',
            access_count INTEGER NOT NULL DEFAULT 0,
            unique_users INTEGER NOT NULL DEFAULT 0,
            bytes_sent_sum INTEGER NOT NULL DEFAULT 0,
            bytes_sent_max INTEGER NOT NULL DEFAULT 0,
            bytes_sent_p95 INTEGER NOT NULL DEFAULT 0,
            bytes_received_sum INTEGER NOT NULL DEFAULT 0,
            burst_max_5min INTEGER NOT NULL DEFAULT 0,
            cumulative_user_domain_day_max INTEGER NOT NULL DEFAULT 0,
            candidate_flags TEXT,
            sampled INTEGER NOT NULL DEFAULT 0,
            first_seen TEXT NOT NULL DEFAULT '',
            last_seen TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (run_id, url_signature)
        );

        CREATE TABLE IF NOT EXISTS analysis_cache (
            url_signature TEXT PRIMARY KEY,
            service_name TEXT NOT NULL DEFAULT '',
            usage_type TEXT NOT NULL DEFAULT 'unknown',
            risk_level TEXT NOT NULL DEFAULT 'unknown',
            category TEXT NOT NULL DEFAULT 'Unknown',
            confidence REAL NOT NULL DEFAULT 0,
            rationale_short TEXT NOT NULL DEFAULT '',
            classification_source TEXT NOT NULL DEFAULT 'RULE',
            signature_version TEXT NOT NULL DEFAULT '',
            rule_version TEXT NOT NULL DEFAULT '',
            prompt_version TEXT NOT NULL DEFAULT '',
            taxonomy_version TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active',
            is_human_verified INTEGER NOT NULL DEFAULT 0,
            fs_code TEXT NOT NULL DEFAULT '',
            im_code TEXT NOT NULL DEFAULT '',
            uc_codes_json TEXT NOT NULL DEFAULT '[]',
            dt_codes_json TEXT NOT NULL DEFAULT '[]',
            ch_codes_json TEXT NOT NULL DEFAULT '[]',
            rs_codes_json TEXT NOT NULL DEFAULT '[]',
            ev_codes_json TEXT NOT NULL DEFAULT '[]',
            ob_codes_json TEXT NOT NULL DEFAULT '[]',
            -- Legacy single-value taxonomy columns; read-only compatibility.
            fs_uc_code TEXT,
            dt_code TEXT,
            ch_code TEXT,
            rs_code TEXT,
            ev_code TEXT,
            ob_code TEXT,
            error_kind TEXT,
            error_reason TEXT,
            retry_after TEXT,
            failure_count INTEGER NOT NULL DEFAULT 0,
            analyzed_at TEXT,
            created_at TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_cache_status ON analysis_cache(status);
        CREATE INDEX IF NOT EXISTS idx_cache_human ON analysis_cache(is_human_verified);

        CREATE TABLE IF NOT EXISTS input_files (
            file_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            file_hash TEXT NOT NULL DEFAULT '',
            vendor TEXT NOT NULL DEFAULT '',
            min_time TEXT,
            max_time TEXT,
            row_count INTEGER NOT NULL DEFAULT 0,
            parse_error_count INTEGER NOT NULL DEFAULT 0,
            ingested_at TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_input_files_run ON input_files(run_id);

        CREATE TABLE IF NOT EXISTS pii_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            url_signature TEXT NOT NULL,
            kind TEXT NOT NULL,
            field_source TEXT NOT NULL,
            redaction_token TEXT NOT NULL,
            original_hash TEXT NOT NULL,
            occurrence_count INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS run_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            name TEXT NOT NULL,
            value REAL NOT NULL,
            recorded_at TEXT NOT NULL DEFAULT ''
        );
        "#,
    )
    .map_err(|err| StoreError::Migration(err.to_string()))?;

    let current: Option<i64> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();
    match current {
        None => {
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [
                SCHEMA_VERSION,
            ])?;
        }
        Some(version) if version == SCHEMA_VERSION => {}
        Some(version) if version < SCHEMA_VERSION => {
            // Future migrations slot in here, version by version.
            conn.execute("UPDATE schema_version SET version = ?1", [SCHEMA_VERSION])?;
        }
        Some(version) => {
            return Err(StoreError::Migration(format!(
                "database schema version {version} is newer than supported {SCHEMA_VERSION}"
            )));
        }
    }
    Ok(())
}
