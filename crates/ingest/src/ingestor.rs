use crate::delimited::{detect_delimiter, split_row};
use crate::mapping::{VendorMapping, OPTIONAL_FIELDS, REQUIRED_FIELDS};
use crate::{IngestError, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use shadowscan_model::CanonicalEvent;
use shadowscan_normalize::{Canonicalizer, PiiDetection, PublicSuffixList};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Fraction of rows in one file that may fail to parse before the file
    /// (and the run) is rejected.
    pub max_parse_error_rate: f64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_parse_error_rate: 0.10,
        }
    }
}

/// Per-file ingestion accounting, recorded in the input-file registry and
/// folded into the definitive input manifest hash.
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub file_path: String,
    pub file_size: u64,
    pub file_hash: String,
    pub vendor: String,
    pub row_count: u64,
    pub parse_error_count: u64,
    pub min_time: Option<DateTime<Utc>>,
    pub max_time: Option<DateTime<Utc>>,
}

/// One ingested file: canonical events, the PII detections observed per
/// event (parallel to `events`), and the accounting summary.
#[derive(Debug)]
pub struct IngestedFile {
    pub events: Vec<CanonicalEvent>,
    pub pii: Vec<Vec<PiiDetection>>,
    pub summary: FileSummary,
}

/// Maps one vendor's rows into canonical events.
pub struct Ingestor<'a> {
    mapping: &'a VendorMapping,
    canonicalizer: &'a Canonicalizer,
    psl: &'a PublicSuffixList,
    options: IngestOptions,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        mapping: &'a VendorMapping,
        canonicalizer: &'a Canonicalizer,
        psl: &'a PublicSuffixList,
        options: IngestOptions,
    ) -> Self {
        Self {
            mapping,
            canonicalizer,
            psl,
            options,
        }
    }

    /// Ingest one file. Unparseable rows are counted and logged; the file
    /// fails only when the parse-error rate crosses the configured threshold.
    pub fn ingest_file(&self, path: &Path) -> Result<IngestedFile> {
        let bytes = std::fs::read(path)?;
        let file_hash = hex::encode(Sha256::digest(&bytes));
        let text = String::from_utf8_lossy(&bytes);
        let mut lines = text.lines();

        let header = lines
            .next()
            .ok_or_else(|| IngestError::MissingHeader(path.display().to_string()))?;
        let delimiter = detect_delimiter(
            path.extension().and_then(|e| e.to_str()),
            header,
        );
        let columns = self.resolve_columns(header, delimiter, path)?;

        let mut events = Vec::new();
        let mut pii = Vec::new();
        let mut row_count = 0u64;
        let mut parse_errors = 0u64;
        let mut min_time: Option<DateTime<Utc>> = None;
        let mut max_time: Option<DateTime<Utc>> = None;

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            row_count += 1;
            match self.parse_row(line, delimiter, &columns) {
                Ok((event, detections)) => {
                    min_time = Some(match min_time {
                        Some(t) => t.min(event.event_time),
                        None => event.event_time,
                    });
                    max_time = Some(match max_time {
                        Some(t) => t.max(event.event_time),
                        None => event.event_time,
                    });
                    events.push(event);
                    pii.push(detections);
                }
                Err(reason) => {
                    parse_errors += 1;
                    log::debug!(
                        "malformed row {} in {}: {reason}",
                        row_count,
                        path.display()
                    );
                }
            }
        }

        if row_count > 0 {
            let rate = parse_errors as f64 / row_count as f64;
            if rate > self.options.max_parse_error_rate {
                return Err(IngestError::ParseErrorRateExceeded {
                    file: path.display().to_string(),
                    rate,
                    threshold: self.options.max_parse_error_rate,
                });
            }
            if parse_errors > 0 {
                log::warn!(
                    "{}: {parse_errors}/{row_count} rows failed to parse",
                    path.display()
                );
            }
        }

        let summary = FileSummary {
            file_path: path.display().to_string(),
            file_size: bytes.len() as u64,
            file_hash,
            vendor: self.mapping.vendor.clone(),
            row_count,
            parse_error_count: parse_errors,
            min_time,
            max_time,
        };
        Ok(IngestedFile {
            events,
            pii,
            summary,
        })
    }

    fn resolve_columns(
        &self,
        header: &str,
        delimiter: char,
        path: &Path,
    ) -> Result<HashMap<&'static str, usize>> {
        let names: Vec<String> = split_row(header, delimiter)
            .into_iter()
            .map(|name| name.trim().to_lowercase())
            .collect();
        let index_of = |candidates: &[String]| -> Option<usize> {
            candidates
                .iter()
                .find_map(|c| names.iter().position(|n| *n == c.to_lowercase()))
        };

        let mut columns = HashMap::new();
        for field in REQUIRED_FIELDS {
            let candidates = self.mapping.fields.get(field).cloned().unwrap_or_default();
            match index_of(&candidates) {
                Some(idx) => {
                    columns.insert(field, idx);
                }
                None => {
                    return Err(IngestError::UnmappedField {
                        field,
                        file: path.display().to_string(),
                        candidates,
                    })
                }
            }
        }
        for field in OPTIONAL_FIELDS {
            if let Some(candidates) = self.mapping.fields.get(field) {
                if let Some(idx) = index_of(candidates) {
                    columns.insert(field, idx);
                }
            }
        }
        Ok(columns)
    }

    fn parse_row(
        &self,
        line: &str,
        delimiter: char,
        columns: &HashMap<&'static str, usize>,
    ) -> std::result::Result<(CanonicalEvent, Vec<PiiDetection>), String> {
        let fields = split_row(line, delimiter);
        let get = |name: &str| -> Option<&str> {
            columns
                .get(name)
                .and_then(|&idx| fields.get(idx))
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
        };

        let ts_raw = get("event_time").ok_or("missing timestamp")?;
        let event_time = parse_timestamp(ts_raw).ok_or_else(|| format!("bad timestamp {ts_raw:?}"))?;
        let user_id = get("user_id").ok_or("missing user id")?.to_string();
        let url = get("url").ok_or("missing url")?.to_string();

        let mut canonical = self
            .canonicalizer
            .canonicalize(&url)
            .map_err(|err| format!("canonicalize: {err}"))?;
        let dest_domain = self.psl.registrable_domain(&canonical.host);
        let detections = std::mem::take(&mut canonical.pii);

        let lineage_hash = hex::encode(Sha256::digest(line.as_bytes()));
        let http_method = get("http_method").map(|m| m.to_ascii_uppercase());
        let action = self.mapping.translate_action(get("action"));

        let event = CanonicalEvent {
            event_time,
            vendor: self.mapping.vendor.clone(),
            user_id,
            src_ip: get("src_ip").unwrap_or_default().to_string(),
            dest_host: canonical.host.clone(),
            dest_domain,
            url,
            norm_path: canonical.path,
            norm_query: canonical.query,
            http_method,
            action,
            bytes_sent: get("bytes_sent").and_then(|v| v.parse().ok()).unwrap_or(0),
            bytes_received: get("bytes_received")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            app_category: get("app_category").map(|s| s.to_string()),
            lineage_hash,
            url_signature: String::new(),
        };
        Ok((event, detections))
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}
