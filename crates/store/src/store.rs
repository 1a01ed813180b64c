use crate::queries::Reader;
use crate::schema;
use crate::writer::Writer;
use crate::Result;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Factory for the embedded store. Opening applies migrations; a migration
/// failure is fatal and surfaces before any stage runs.
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Store> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::apply_migrations(&conn)?;
        drop(conn);
        Ok(Store {
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Spawn the single writer task. There must be exactly one per store;
    /// the orchestrator owns it for the lifetime of the run.
    pub fn spawn_writer(&self) -> Result<Writer> {
        Writer::spawn(&self.db_path)
    }

    /// Open a read-only handle. Any worker may hold one concurrently with
    /// the writer.
    pub fn reader(&self) -> Result<Reader> {
        Reader::open(&self.db_path)
    }
}

#[cfg(test)]
mod tests {
    use crate::queries::InputFileRow;
    use crate::writer::Intent;
    use crate::Store;
    use chrono::{TimeZone, Utc};
    use shadowscan_model::{
        CandidateFlags, ClassificationRecord, ClassificationSource, ErrorKind, RecordStatus,
        RunRecord, RunStatus, SignatureStats, TaxonomyAssignment, VersionPins,
    };

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("cache.db")).unwrap();
        (dir, store)
    }

    fn classification(signature: &str, service: &str) -> ClassificationRecord {
        let mut record = ClassificationRecord::pending(signature);
        record.service_name = service.to_string();
        record.category = "GenAI".to_string();
        record.confidence = 0.9;
        record.source = ClassificationSource::Llm;
        record.taxonomy = TaxonomyAssignment {
            fs_code: "FS-GEN".to_string(),
            im_code: "IM-WEB".to_string(),
            uc_codes: vec!["UC-CHAT".to_string()],
            dt_codes: vec!["DT-TEXT".to_string()],
            ch_codes: vec!["CH-SAAS".to_string()],
            rs_codes: vec!["RS-EXFIL".to_string()],
            ev_codes: vec!["EV-PROXY".to_string()],
            ob_codes: vec![],
        };
        record
    }

    fn run_record(run_id: &str) -> RunRecord {
        RunRecord {
            run_id: run_id.to_string(),
            run_key: format!("{run_id}-key"),
            started_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            finished_at: None,
            status: RunStatus::Running,
            last_completed_stage: 0,
            input_manifest_hash: "m".to_string(),
            range_start: None,
            range_end: None,
            pins: VersionPins::default(),
            total_events: 0,
            unique_signatures: 0,
            cache_hit_count: 0,
            llm_sent_count: 0,
        }
    }

    #[test]
    fn upsert_inserts_then_updates_allowed_columns() {
        let (_dir, store) = temp_store();
        let writer = store.spawn_writer().unwrap();
        let handle = writer.handle();

        handle
            .enqueue(Intent::UpsertClassification(classification("sig1", "First")))
            .unwrap();
        handle.flush().unwrap();

        let mut updated = classification("sig1", "Second");
        updated.usage_type = "genai_api".to_string(); // immutable via UPSERT
        handle.enqueue(Intent::UpsertClassification(updated)).unwrap();
        handle.flush().unwrap();

        let reader = store.reader().unwrap();
        let record = reader.get_classification("sig1").unwrap().unwrap();
        assert_eq!(record.service_name, "Second");
        // usage_type was set at insert and is not updatable afterwards.
        assert_eq!(record.usage_type, "unknown");
        writer.shutdown().unwrap();
    }

    #[test]
    fn human_verified_rows_are_never_overwritten() {
        let (_dir, store) = temp_store();
        let writer = store.spawn_writer().unwrap();
        let handle = writer.handle();

        let mut human = classification("abc", "Human");
        human.is_human_verified = true;
        human.source = ClassificationSource::Human;
        handle.enqueue(Intent::UpsertClassification(human)).unwrap();
        handle.flush().unwrap();

        let mut llm = classification("abc", "LLM");
        llm.is_human_verified = false;
        handle.enqueue(Intent::UpsertClassification(llm)).unwrap();
        // A state transition must be blocked too.
        handle
            .enqueue(Intent::SetClassificationState {
                url_signature: "abc".to_string(),
                status: RecordStatus::Skipped,
                error_kind: Some(ErrorKind::InvalidRequest),
                error_reason: Some("should not land".to_string()),
                retry_after: None,
                failure_count: 3,
            })
            .unwrap();
        handle.flush().unwrap();

        let reader = store.reader().unwrap();
        let record = reader.get_classification("abc").unwrap().unwrap();
        assert_eq!(record.service_name, "Human");
        assert_eq!(record.status, RecordStatus::Active);
        assert!(record.is_human_verified);
        writer.shutdown().unwrap();
    }

    #[test]
    fn batch_duplicates_keep_last_occurrence() {
        let (_dir, store) = temp_store();
        let writer = store.spawn_writer().unwrap();
        let handle = writer.handle();

        for service in ["one", "two", "three"] {
            handle
                .enqueue(Intent::UpsertClassification(classification("dup", service)))
                .unwrap();
        }
        handle.flush().unwrap();

        let reader = store.reader().unwrap();
        let record = reader.get_classification("dup").unwrap().unwrap();
        assert_eq!(record.service_name, "three");
        writer.shutdown().unwrap();
    }

    #[test]
    fn skipped_signatures_leave_the_pending_view() {
        let (_dir, store) = temp_store();
        let writer = store.spawn_writer().unwrap();
        let handle = writer.handle();

        let mut unknown = ClassificationRecord::pending("pending1");
        unknown.category = "Unknown".to_string();
        handle.enqueue(Intent::UpsertClassification(unknown)).unwrap();
        let mut skipme = ClassificationRecord::pending("skipme");
        skipme.category = "Unknown".to_string();
        handle.enqueue(Intent::UpsertClassification(skipme)).unwrap();
        handle.flush().unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let reader = store.reader().unwrap();
        let pending = reader.pending_for_llm(&now, 10).unwrap();
        assert_eq!(pending.len(), 2);

        handle
            .enqueue(Intent::SetClassificationState {
                url_signature: "skipme".to_string(),
                status: RecordStatus::Skipped,
                error_kind: Some(ErrorKind::ContextLengthExceeded),
                error_reason: Some("prompt too large".to_string()),
                retry_after: None,
                failure_count: 1,
            })
            .unwrap();
        handle.flush().unwrap();

        let pending = reader.pending_for_llm(&now, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url_signature, "pending1");

        // Far in the future the skip still holds.
        let later = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let pending = reader.pending_for_llm(&later, 10).unwrap();
        assert_eq!(pending.len(), 1);
        writer.shutdown().unwrap();
    }

    #[test]
    fn retry_after_gates_the_pending_view() {
        let (_dir, store) = temp_store();
        let writer = store.spawn_writer().unwrap();
        let handle = writer.handle();

        let mut record = ClassificationRecord::pending("retry1");
        record.category = "Unknown".to_string();
        handle.enqueue(Intent::UpsertClassification(record)).unwrap();
        let retry_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        handle
            .enqueue(Intent::SetClassificationState {
                url_signature: "retry1".to_string(),
                status: RecordStatus::Active,
                error_kind: Some(ErrorKind::RateLimit),
                error_reason: Some("429".to_string()),
                retry_after: Some(retry_at),
                failure_count: 1,
            })
            .unwrap();
        handle.flush().unwrap();

        let reader = store.reader().unwrap();
        let before = Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap();
        assert!(reader.pending_for_llm(&before, 10).unwrap().is_empty());
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();
        assert_eq!(reader.pending_for_llm(&after, 10).unwrap().len(), 1);
        writer.shutdown().unwrap();
    }

    #[test]
    fn run_checkpoints_round_trip() {
        let (_dir, store) = temp_store();
        let writer = store.spawn_writer().unwrap();
        let handle = writer.handle();

        handle.enqueue(Intent::UpsertRun(run_record("run1"))).unwrap();
        handle
            .enqueue(Intent::Checkpoint {
                run_id: "run1".to_string(),
                stage: 3,
                status: RunStatus::Partial,
            })
            .unwrap();
        handle.flush().unwrap();

        let reader = store.reader().unwrap();
        let run = reader.get_run("run1").unwrap().unwrap();
        assert_eq!(run.last_completed_stage, 3);
        assert_eq!(run.status, RunStatus::Partial);

        handle
            .enqueue(Intent::FinalizeRun {
                run_id: "run1".to_string(),
                status: RunStatus::Succeeded,
                finished_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            })
            .unwrap();
        handle.flush().unwrap();
        let run = reader.get_run("run1").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.finished_at.is_some());
        writer.shutdown().unwrap();
    }

    #[test]
    fn enqueue_after_shutdown_fails_with_send_error() {
        let (_dir, store) = temp_store();
        let writer = store.spawn_writer().unwrap();
        let handle = writer.handle();
        writer.shutdown().unwrap();

        let err = handle
            .enqueue(Intent::UpsertRun(run_record("run2")))
            .unwrap_err();
        assert!(matches!(err, crate::StoreError::WriterClosed));
    }

    #[test]
    fn stats_and_input_files_round_trip() {
        let (_dir, store) = temp_store();
        let writer = store.spawn_writer().unwrap();
        let handle = writer.handle();

        let seen = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let stats = SignatureStats {
            run_id: "run1".to_string(),
            url_signature: "sig9".to_string(),
            norm_host: "example.com".to_string(),
            norm_path_template: "/x?p=1".to_string(),
            dest_domain: "example.com".to_string(),
            bytes_sent_bucket: "L".to_string(),
            access_count: 4,
            unique_users: 2,
            bytes_sent_sum: 4096,
            bytes_sent_max: 2048,
            bytes_sent_p95: 2048,
            bytes_received_sum: 100,
            burst_max_5min: 3,
            cumulative_user_domain_day_max: 4096,
            flags: CandidateFlags {
                b: true,
                burst: true,
                ..Default::default()
            },
            sampled: false,
            first_seen: seen,
            last_seen: seen,
        };
        handle.enqueue(Intent::UpsertStats(stats)).unwrap();
        handle
            .enqueue(Intent::UpsertInputFile(InputFileRow {
                file_id: "f1".to_string(),
                run_id: "run1".to_string(),
                file_path: "/in/a.csv".to_string(),
                file_size: 10,
                file_hash: "h".to_string(),
                vendor: "zscaler".to_string(),
                min_time: Some(seen),
                max_time: Some(seen),
                row_count: 5,
                parse_error_count: 1,
                ingested_at: seen,
            }))
            .unwrap();
        handle.flush().unwrap();

        let reader = store.reader().unwrap();
        let stats = reader.stats_for_run("run1").unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].flags.render().as_deref(), Some("B|burst"));
        assert_eq!(stats[0].first_seen, seen);

        let files = reader.input_files_for_run("run1").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].parse_error_count, 1);
        writer.shutdown().unwrap();
    }
}
