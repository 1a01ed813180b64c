use crate::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Validate a bundle directory against its own indices.
///
/// Returns the list of problems found; empty means the bundle is internally
/// consistent. IO errors reading the bundle surface as problems, not as
/// hard errors, so a truncated bundle still produces a report.
pub fn validate_bundle(bundle_dir: &Path) -> Result<Vec<String>> {
    let mut problems = Vec::new();

    let manifest_bytes = match std::fs::read(bundle_dir.join("manifest.json")) {
        Ok(bytes) => bytes,
        Err(err) => return Ok(vec![format!("manifest.json unreadable: {err}")]),
    };
    let manifest: serde_json::Value = match serde_json::from_slice(&manifest_bytes) {
        Ok(value) => value,
        Err(err) => return Ok(vec![format!("manifest.json is not JSON: {err}")]),
    };
    let manifest_hash = hex::encode(Sha256::digest(&manifest_bytes));

    for field in ["bundle_id", "bundle_version", "created_at", "scope_ref"] {
        if manifest.get(field).is_none() {
            problems.push(format!("manifest.json missing {field}"));
        }
    }

    // Every indexed file must exist with the recorded digest.
    for index in ["payload_index", "object_index"] {
        let Some(entries) = manifest.get(index).and_then(|v| v.as_array()) else {
            problems.push(format!("manifest.json missing {index}"));
            continue;
        };
        for entry in entries {
            let path = entry.get("path").and_then(|v| v.as_str()).unwrap_or("");
            let expected = entry.get("sha256").and_then(|v| v.as_str()).unwrap_or("");
            if path.is_empty() || expected.is_empty() {
                problems.push(format!("{index} entry without path/sha256: {entry}"));
                continue;
            }
            match std::fs::read(bundle_dir.join(path)) {
                Ok(bytes) => {
                    let actual = hex::encode(Sha256::digest(&bytes));
                    if actual != expected {
                        problems.push(format!(
                            "{path}: digest mismatch (recorded {expected}, actual {actual})"
                        ));
                    }
                }
                Err(err) => problems.push(format!("{path}: unreadable: {err}")),
            }
        }
    }

    // Recompute the embedded hash chain.
    if let Some(chain) = manifest
        .get("hash_chain")
        .and_then(|c| c.get("entries"))
        .and_then(|v| v.as_array())
    {
        let mut prev = String::new();
        for entry in chain {
            let sha256 = entry.get("sha256").and_then(|v| v.as_str()).unwrap_or("");
            let chained = entry.get("chained").and_then(|v| v.as_str()).unwrap_or("");
            let expected = hex::encode(Sha256::digest(format!("{prev}{sha256}").as_bytes()));
            if chained != expected {
                problems.push(format!(
                    "hash chain broken at {}",
                    entry.get("path").and_then(|v| v.as_str()).unwrap_or("?")
                ));
                break;
            }
            prev = chained.to_string();
        }
        let head = manifest
            .get("hash_chain")
            .and_then(|c| c.get("head"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if head != prev {
            problems.push("hash chain head does not match entries".to_string());
        }
    } else {
        problems.push("manifest.json missing hash_chain.entries".to_string());
    }

    // hashes/chain.json must cover the manifest and the objects index.
    match std::fs::read(bundle_dir.join("hashes/chain.json")) {
        Ok(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(records) => {
                let targets: Vec<&str> = records
                    .get("records")
                    .and_then(|v| v.as_array())
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|e| e.get("target").and_then(|t| t.as_str()))
                            .collect()
                    })
                    .unwrap_or_default();
                for required in ["manifest.json", "objects/index.json"] {
                    if !targets.contains(&required) {
                        problems.push(format!("hashes/chain.json does not cover {required}"));
                    }
                }
                let recorded_manifest = records
                    .get("records")
                    .and_then(|v| v.as_array())
                    .and_then(|entries| {
                        entries.iter().find(|e| {
                            e.get("target").and_then(|t| t.as_str()) == Some("manifest.json")
                        })
                    })
                    .and_then(|e| e.get("sha256"))
                    .and_then(|v| v.as_str());
                if recorded_manifest != Some(manifest_hash.as_str()) {
                    problems.push("hashes/chain.json records a stale manifest digest".to_string());
                }
            }
            Err(err) => problems.push(format!("hashes/chain.json is not JSON: {err}")),
        },
        Err(err) => problems.push(format!("hashes/chain.json unreadable: {err}")),
    }

    // At least one signature entry referencing manifest.json.
    let signatures_dir = bundle_dir.join("signatures");
    let mut signature_found = false;
    if let Ok(read_dir) = std::fs::read_dir(&signatures_dir) {
        for entry in read_dir.flatten() {
            if let Ok(bytes) = std::fs::read(entry.path()) {
                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                    let targets_manifest = value.get("target").and_then(|v| v.as_str())
                        == Some("manifest.json");
                    let hash_matches = value.get("target_sha256").and_then(|v| v.as_str())
                        == Some(manifest_hash.as_str());
                    if targets_manifest && hash_matches {
                        signature_found = true;
                    }
                }
            }
        }
    }
    if !signature_found {
        problems.push("no signature entry references manifest.json".to_string());
    }

    Ok(problems)
}

#[cfg(test)]
mod tests {
    use super::validate_bundle;
    use crate::emitter::{BundleInputs, EvidenceEmitter};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use shadowscan_model::{
        CandidateFlags, ClassificationRecord, RunRecord, RunStatus, SignatureStats, VersionPins,
    };

    fn inputs() -> BundleInputs {
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let seen = started + chrono::Duration::minutes(5);
        let mut classification = ClassificationRecord::pending("sig1");
        classification.service_name = "ChatGPT".to_string();
        classification.category = "GenAI".to_string();
        classification.risk_level = "high".to_string();
        BundleInputs {
            run: RunRecord {
                run_id: "abcdef0123456789".to_string(),
                run_key: "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef"
                    .to_string(),
                started_at: started,
                finished_at: None,
                status: RunStatus::Running,
                last_completed_stage: 4,
                input_manifest_hash: "m".to_string(),
                range_start: None,
                range_end: None,
                pins: VersionPins::default(),
                total_events: 10,
                unique_signatures: 1,
                cache_hit_count: 0,
                llm_sent_count: 1,
            },
            stats: vec![SignatureStats {
                run_id: "abcdef0123456789".to_string(),
                url_signature: "sig1".to_string(),
                norm_host: "api.example.com".to_string(),
                norm_path_template: "/v1/chat?p=1".to_string(),
                dest_domain: "example.com".to_string(),
                bytes_sent_bucket: "L".to_string(),
                access_count: 10,
                unique_users: 2,
                bytes_sent_sum: 1000,
                bytes_sent_max: 500,
                bytes_sent_p95: 500,
                bytes_received_sum: 0,
                burst_max_5min: 0,
                cumulative_user_domain_day_max: 1000,
                flags: CandidateFlags {
                    b: true,
                    ..Default::default()
                },
                sampled: false,
                first_seen: seen,
                last_seen: seen,
            }],
            classifications: vec![classification],
            selection_audit: json!({"counts": {"a_count": 0, "b_count": 1}, "exclusions": []}),
            metrics: vec![("stage_ingest_secs".to_string(), 1.5)],
            pii_audit_count: 2,
            psl_hash: "pslhash".to_string(),
        }
    }

    #[test]
    fn emitted_bundle_validates_cleanly() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = EvidenceEmitter::emit(&inputs(), dir.path()).unwrap();
        assert!(result.files_written.contains(&"manifest.json".to_string()));
        assert!(validate_bundle(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn emission_is_deterministic() {
        let dir_a = tempfile::TempDir::new().unwrap();
        let dir_b = tempfile::TempDir::new().unwrap();
        let first = EvidenceEmitter::emit(&inputs(), dir_a.path()).unwrap();
        let second = EvidenceEmitter::emit(&inputs(), dir_b.path()).unwrap();
        assert_eq!(first.files_written, second.files_written);
        for file in &first.files_written {
            let a = std::fs::read(dir_a.path().join(file)).unwrap();
            let b = std::fs::read(dir_b.path().join(file)).unwrap();
            assert_eq!(a, b, "{file} differs between identical runs");
        }
    }

    #[test]
    fn tampering_is_detected() {
        let dir = tempfile::TempDir::new().unwrap();
        EvidenceEmitter::emit(&inputs(), dir.path()).unwrap();
        std::fs::write(
            dir.path().join("payloads/summary.json"),
            b"{\"tampered\":true}",
        )
        .unwrap();
        let problems = validate_bundle(dir.path()).unwrap();
        assert!(problems.iter().any(|p| p.contains("summary.json")));
    }

    #[test]
    fn missing_signature_is_detected() {
        let dir = tempfile::TempDir::new().unwrap();
        EvidenceEmitter::emit(&inputs(), dir.path()).unwrap();
        std::fs::remove_file(dir.path().join("signatures/bundle.sig")).unwrap();
        let problems = validate_bundle(dir.path()).unwrap();
        assert!(problems.iter().any(|p| p.contains("signature")));
    }

    #[test]
    fn bundle_id_is_derived_from_the_run_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = EvidenceEmitter::emit(&inputs(), dir.path()).unwrap();
        assert!(result.bundle_id.starts_with("eb_deadbeef"));
    }
}
