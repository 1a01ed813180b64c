use crate::{EvidenceError, Result};
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use shadowscan_model::canonical_json;
use shadowscan_model::{ClassificationRecord, RunRecord, SignatureStats};
use std::path::{Path, PathBuf};

pub const BUNDLE_VERSION: &str = "1.0";

/// Everything the emitter needs, read out of the store before emission.
/// Statistics are final by this stage boundary.
#[derive(Debug, Clone)]
pub struct BundleInputs {
    pub run: RunRecord,
    pub stats: Vec<SignatureStats>,
    pub classifications: Vec<ClassificationRecord>,
    pub selection_audit: serde_json::Value,
    pub metrics: Vec<(String, f64)>,
    pub pii_audit_count: u64,
    pub psl_hash: String,
}

#[derive(Debug, Clone)]
pub struct BundleResult {
    pub bundle_dir: PathBuf,
    pub bundle_id: String,
    pub files_written: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct IndexEntry {
    path: String,
    sha256: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChainEntry {
    seq: usize,
    path: String,
    sha256: String,
    chained: String,
}

pub struct EvidenceEmitter;

impl EvidenceEmitter {
    /// Emit the bundle under `bundle_dir`, then validate it. A validation
    /// failure is returned as an error; the caller marks the run `failed`.
    pub fn emit(inputs: &BundleInputs, bundle_dir: &Path) -> Result<BundleResult> {
        let run = &inputs.run;
        let bundle_id = format!("eb_{}", &run.run_key[..run.run_key.len().min(32)]);
        let created_at = run
            .started_at
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        for sub in ["payloads/logs", "payloads/analysis", "objects", "signatures", "hashes"] {
            std::fs::create_dir_all(bundle_dir.join(sub))?;
        }

        let mut payload_index: Vec<IndexEntry> = Vec::new();
        let mut files_written: Vec<String> = Vec::new();

        // payloads/run_manifest.json
        let run_manifest = json!({
            "run_id": run.run_id,
            "run_key": run.run_key,
            "input_manifest_hash": run.input_manifest_hash,
            "range_start": run.range_start,
            "range_end": run.range_end,
            "signature_scheme_version": run.pins.signature_scheme_version,
            "rule_version": run.pins.rule_version,
            "prompt_version": run.pins.prompt_version,
            "taxonomy_version": run.pins.taxonomy_version,
            "taxonomy_artifact_hash": run.pins.taxonomy_artifact_hash,
            "engine_spec_version": run.pins.engine_spec_version,
            "psl_hash": inputs.psl_hash,
            "started_at": created_at,
            "extraction_parameters": inputs.selection_audit,
        });
        write_payload(
            bundle_dir,
            "payloads/run_manifest.json",
            &run_manifest,
            &mut payload_index,
            &mut files_written,
        )?;

        // payloads/analysis/taxonomy_assignments.json
        let assignments: Vec<_> = inputs
            .classifications
            .iter()
            .map(|record| {
                json!({
                    "url_signature": record.url_signature,
                    "service_name": record.service_name,
                    "status": record.status.as_str(),
                    "source": record.source.as_str(),
                    "fs_code": record.taxonomy.fs_code,
                    "im_code": record.taxonomy.im_code,
                    "uc_codes": record.taxonomy.uc_codes,
                    "dt_codes": record.taxonomy.dt_codes,
                    "ch_codes": record.taxonomy.ch_codes,
                    "rs_codes": record.taxonomy.rs_codes,
                    "ev_codes": record.taxonomy.ev_codes,
                    "ob_codes": record.taxonomy.ob_codes,
                })
            })
            .collect();
        write_payload(
            bundle_dir,
            "payloads/analysis/taxonomy_assignments.json",
            &json!({"taxonomy_version": run.pins.taxonomy_version, "assignments": assignments}),
            &mut payload_index,
            &mut files_written,
        )?;

        // payloads/logs/shadow_ai_discovery.jsonl: one line per flagged
        // signature with a resolved classification.
        let mut discovery_lines = Vec::new();
        for stats in &inputs.stats {
            if stats.flags.is_empty() {
                continue;
            }
            let classification = inputs
                .classifications
                .iter()
                .find(|c| c.url_signature == stats.url_signature);
            discovery_lines.push(canonical_json::to_canonical_string(&json!({
                "run_id": run.run_id,
                "url_signature": stats.url_signature,
                "norm_host": stats.norm_host,
                "candidate_flags": stats.flags.render(),
                "access_count": stats.access_count,
                "bytes_sent_sum": stats.bytes_sent_sum,
                "service_name": classification.map(|c| c.service_name.clone()),
                "risk_level": classification.map(|c| c.risk_level.clone()),
                "category": classification.map(|c| c.category.clone()),
            }))?);
        }
        write_jsonl(
            bundle_dir,
            "payloads/logs/shadow_ai_discovery.jsonl",
            &discovery_lines,
            &mut payload_index,
            &mut files_written,
        )?;

        // payloads/logs/agent_activity.jsonl: stage metrics.
        let activity_lines: Vec<String> = inputs
            .metrics
            .iter()
            .map(|(name, value)| {
                canonical_json::to_canonical_string(&json!({
                    "run_id": run.run_id,
                    "metric": name,
                    "value": value,
                }))
            })
            .collect::<serde_json::Result<_>>()?;
        write_jsonl(
            bundle_dir,
            "payloads/logs/agent_activity.jsonl",
            &activity_lines,
            &mut payload_index,
            &mut files_written,
        )?;

        // payloads/summary.json
        let flagged = inputs.stats.iter().filter(|s| !s.flags.is_empty()).count();
        let summary = json!({
            "run_id": run.run_id,
            "status": run.status.as_str(),
            "total_events": run.total_events,
            "unique_signatures": run.unique_signatures,
            "flagged_signatures": flagged,
            "cache_hit_count": run.cache_hit_count,
            "llm_sent_count": run.llm_sent_count,
            "pii_audit_count": inputs.pii_audit_count,
            "counts": inputs.selection_audit.get("counts").cloned().unwrap_or(json!(null)),
            "exclusions": inputs.selection_audit.get("exclusions").cloned().unwrap_or(json!([])),
        });
        write_payload(
            bundle_dir,
            "payloads/summary.json",
            &summary,
            &mut payload_index,
            &mut files_written,
        )?;

        // payloads/dictionary.json: column dictionary for downstream readers.
        write_payload(
            bundle_dir,
            "payloads/dictionary.json",
            &dictionary(),
            &mut payload_index,
            &mut files_written,
        )?;

        // payloads/change_log.json
        write_payload(
            bundle_dir,
            "payloads/change_log.json",
            &json!({"bundle_version": BUNDLE_VERSION, "changes": []}),
            &mut payload_index,
            &mut files_written,
        )?;

        // payloads/evidence_pack_manifest.json enumerates the other payloads.
        let pack_manifest = json!({
            "bundle_version": BUNDLE_VERSION,
            "run_id": run.run_id,
            "files": payload_index,
        });
        write_payload(
            bundle_dir,
            "payloads/evidence_pack_manifest.json",
            &pack_manifest,
            &mut payload_index,
            &mut files_written,
        )?;

        // objects/index.json enumerates every payload.
        let objects_index = json!({
            "bundle_version": BUNDLE_VERSION,
            "objects": payload_index,
        });
        let objects_bytes = canonical_json::to_canonical_bytes(&objects_index)?;
        std::fs::write(bundle_dir.join("objects/index.json"), &objects_bytes)?;
        let objects_entry = IndexEntry {
            path: "objects/index.json".to_string(),
            sha256: hex_digest(&objects_bytes),
        };
        files_written.push(objects_entry.path.clone());

        // Hash chain over payloads then the objects index.
        let mut chain: Vec<ChainEntry> = Vec::new();
        let mut prev = String::new();
        for entry in payload_index.iter().chain(std::iter::once(&objects_entry)) {
            let chained = hex_digest(format!("{prev}{}", entry.sha256).as_bytes());
            chain.push(ChainEntry {
                seq: chain.len(),
                path: entry.path.clone(),
                sha256: entry.sha256.clone(),
                chained: chained.clone(),
            });
            prev = chained;
        }

        // manifest.json seals the bundle.
        let manifest = json!({
            "bundle_id": bundle_id,
            "bundle_version": BUNDLE_VERSION,
            "created_at": created_at,
            "scope_ref": {"run_id": run.run_id, "run_key": run.run_key},
            "object_index": [objects_entry],
            "payload_index": payload_index,
            "hash_chain": {"algorithm": "sha256", "entries": chain, "head": prev},
            "signing": {"scheme": "sha256-detached", "signature_files": ["signatures/bundle.sig"]},
        });
        let manifest_bytes = canonical_json::to_canonical_bytes(&manifest)?;
        std::fs::write(bundle_dir.join("manifest.json"), &manifest_bytes)?;
        let manifest_hash = hex_digest(&manifest_bytes);
        files_written.push("manifest.json".to_string());

        // hashes/chain.json: the head records covering manifest and objects.
        let head = hex_digest(format!("{manifest_hash}{}", objects_entry.sha256).as_bytes());
        let hash_records = json!({
            "algorithm": "sha256",
            "records": [
                {"target": "manifest.json", "sha256": manifest_hash},
                {"target": "objects/index.json", "sha256": objects_entry.sha256},
            ],
            "head": head,
        });
        std::fs::write(
            bundle_dir.join("hashes/chain.json"),
            canonical_json::to_canonical_bytes(&hash_records)?,
        )?;
        files_written.push("hashes/chain.json".to_string());

        // signatures/bundle.sig: at least one entry targeting manifest.json.
        let signature = json!({
            "target": "manifest.json",
            "target_sha256": manifest_hash,
            "scheme": "sha256-detached",
            "bundle_id": bundle_id,
            "created_at": created_at,
        });
        std::fs::write(
            bundle_dir.join("signatures/bundle.sig"),
            canonical_json::to_canonical_bytes(&signature)?,
        )?;
        files_written.push("signatures/bundle.sig".to_string());

        // The emitter distrusts its own output until the validator agrees.
        let problems = crate::validate_bundle(bundle_dir)?;
        if !problems.is_empty() {
            return Err(EvidenceError::ValidationFailed(problems.join("; ")));
        }

        Ok(BundleResult {
            bundle_dir: bundle_dir.to_path_buf(),
            bundle_id,
            files_written,
        })
    }
}

fn dictionary() -> serde_json::Value {
    json!({
        "url_signature": "content-addressed identifier of a canonical request pattern",
        "candidate_flags": "pipe-joined risk flags: A|B|C|burst|cumulative|sampled",
        "burst_max_5min": "largest write-event count in any (t-300s, t] window",
        "cumulative_user_domain_day_max": "largest per (user, domain, UTC day) upload sum",
        "bytes_sent_p95": "nearest-rank 95th percentile of upload sizes",
        "fs_code": "functional scope (exactly one)",
        "im_code": "integration mode (exactly one)",
        "uc_codes": "use-case classes (one or more)",
        "dt_codes": "data types (one or more)",
        "ch_codes": "channels (one or more)",
        "rs_codes": "risk surfaces (one or more)",
        "ev_codes": "log/event types (one or more)",
        "ob_codes": "outcome/benefit codes (zero or more)",
    })
}

fn hex_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn write_payload(
    bundle_dir: &Path,
    relative: &str,
    value: &serde_json::Value,
    payload_index: &mut Vec<IndexEntry>,
    files_written: &mut Vec<String>,
) -> Result<()> {
    let bytes = canonical_json::to_canonical_bytes(value)?;
    std::fs::write(bundle_dir.join(relative), &bytes)?;
    payload_index.push(IndexEntry {
        path: relative.to_string(),
        sha256: hex_digest(&bytes),
    });
    files_written.push(relative.to_string());
    Ok(())
}

fn write_jsonl(
    bundle_dir: &Path,
    relative: &str,
    lines: &[String],
    payload_index: &mut Vec<IndexEntry>,
    files_written: &mut Vec<String>,
) -> Result<()> {
    let mut bytes = Vec::new();
    for line in lines {
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
    }
    std::fs::write(bundle_dir.join(relative), &bytes)?;
    payload_index.push(IndexEntry {
        path: relative.to_string(),
        sha256: hex_digest(&bytes),
    });
    files_written.push(relative.to_string());
    Ok(())
}
