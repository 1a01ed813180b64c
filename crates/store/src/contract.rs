//! The UPSERT contract.
//!
//! Mutations are `INSERT ... ON CONFLICT DO UPDATE SET col = excluded.col`
//! only; insert-or-replace is prohibited because a delete-then-insert
//! destroys lineage. The update set for each table is the allow-list below:
//! conflict-target columns, primary keys, indexed columns, and the immutable
//! columns (`status`, `started_at`, `is_human_verified`, `usage_type`) are
//! never updated through an UPSERT. Excluded incoming columns are logged for
//! audit. Rows with `is_human_verified = 1` are never mutated at all: the
//! UPSERT succeeds as a no-op and emits a warning.

/// Columns an UPSERT may update, per table.
pub fn updatable_columns(table: &str) -> &'static [&'static str] {
    match table {
        "runs" => &[
            "finished_at",
            "last_completed_stage",
            "input_manifest_hash",
            "psl_hash",
            "total_events",
            "unique_signatures",
            "cache_hit_count",
            "llm_sent_count",
        ],
        "signature_stats" => &[
            "norm_host",
            "norm_path_template",
            "dest_domain",
            "bytes_sent_bucket",
            "access_count",
            "unique_users",
            "bytes_sent_sum",
            "bytes_sent_max",
            "bytes_sent_p95",
            "bytes_received_sum",
            "burst_max_5min",
            "cumulative_user_domain_day_max",
            "candidate_flags",
            "sampled",
            "first_seen",
            "last_seen",
        ],
        "analysis_cache" => &[
            "service_name",
            "risk_level",
            "category",
            "confidence",
            "rationale_short",
            "classification_source",
            "signature_version",
            "rule_version",
            "prompt_version",
            "taxonomy_version",
            "fs_code",
            "im_code",
            "uc_codes_json",
            "dt_codes_json",
            "ch_codes_json",
            "rs_codes_json",
            "ev_codes_json",
            "ob_codes_json",
            "error_kind",
            "error_reason",
            "retry_after",
            "failure_count",
            "analyzed_at",
            "updated_at",
        ],
        "input_files" => &[
            "file_path",
            "file_size",
            "file_hash",
            "vendor",
            "min_time",
            "max_time",
            "row_count",
            "parse_error_count",
            "ingested_at",
        ],
        _ => &[],
    }
}

/// Incoming columns that are present on the record but excluded from the
/// update set, per table: conflict targets, PKs, indexed and immutable
/// columns. Logged whenever an UPSERT hits an existing row.
pub const UPSERT_EXCLUDED_COLUMNS: [(&str, &[&str]); 4] = [
    ("runs", &["run_id", "run_key", "status", "started_at"]),
    ("signature_stats", &["run_id", "url_signature"]),
    (
        "analysis_cache",
        &["url_signature", "status", "usage_type", "is_human_verified", "created_at"],
    ),
    ("input_files", &["file_id", "run_id"]),
];

pub(crate) fn excluded_columns(table: &str) -> &'static [&'static str] {
    UPSERT_EXCLUDED_COLUMNS
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, cols)| *cols)
        .unwrap_or(&[])
}

/// Render the `SET` clause of the contract for a table.
pub(crate) fn update_clause(table: &str) -> String {
    updatable_columns(table)
        .iter()
        .map(|col| format!("{col} = excluded.{col}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immutable_columns_never_appear_in_update_sets() {
        for (table, _) in UPSERT_EXCLUDED_COLUMNS {
            let updatable = updatable_columns(table);
            for excluded in excluded_columns(table) {
                assert!(
                    !updatable.contains(excluded),
                    "{table}: {excluded} must not be updatable"
                );
            }
        }
    }

    #[test]
    fn update_clause_uses_excluded_pseudo_table() {
        let clause = update_clause("runs");
        assert!(clause.contains("finished_at = excluded.finished_at"));
        assert!(!clause.contains("status ="));
        assert!(!clause.contains("started_at ="));
    }
}
