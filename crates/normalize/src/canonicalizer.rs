use crate::config::NormalizerConfig;
use crate::punycode;
use crate::{NormalizeError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use shadowscan_model::PiiKind;

static SCHEME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[a-z][a-z0-9+.-]*://").unwrap());
static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});
static HEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9a-fA-F]{32,}").unwrap());
// No '/' in the class: a path with several segments must never read as one token.
static B64_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9+_-]{22,}={0,2}").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static IPV4_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{6,}").unwrap());

/// One redaction observation: kind, which field it was found in, a hash of
/// the pre-redaction field text, and how many matches were replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiDetection {
    pub kind: PiiKind,
    pub field_source: &'static str,
    pub original_hash: String,
    pub occurrences: u32,
}

#[derive(Debug, Clone)]
pub struct CanonicalUrl {
    pub host: String,
    pub path: String,
    pub query: String,
    pub pii: Vec<PiiDetection>,
}

impl CanonicalUrl {
    pub fn render(&self) -> String {
        let mut out = self.host.clone();
        out.push_str(&self.path);
        if !self.query.is_empty() {
            out.push('?');
            out.push_str(&self.query);
        }
        out
    }
}

/// Deterministic URL canonicalizer. The step order below is contractual:
/// reordering changes the signature space.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    config: NormalizerConfig,
}

impl Canonicalizer {
    pub fn new(config: NormalizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn canonicalize(&self, raw_url: &str) -> Result<CanonicalUrl> {
        // Step 1: trim, strip scheme, split host / path / query.
        let trimmed = raw_url.trim();
        if trimmed.is_empty() {
            return Err(NormalizeError::MalformedUrl("empty URL".to_string()));
        }
        let without_scheme = SCHEME_RE.replace(trimmed, "");
        let without_fragment = match without_scheme.split_once('#') {
            Some((before, _)) => before,
            None => without_scheme.as_ref(),
        };
        let (host_and_path, raw_query) = match without_fragment.split_once('?') {
            Some((hp, q)) => (hp, q),
            None => (without_fragment, ""),
        };
        let (raw_host, raw_path) = match host_and_path.split_once('/') {
            Some((h, p)) => (h, format!("/{p}")),
            None => (host_and_path, "/".to_string()),
        };
        if raw_host.is_empty() {
            return Err(NormalizeError::MalformedUrl(format!(
                "no host in {trimmed:?}"
            )));
        }

        // Step 2: lowercase host, punycode IDN labels, strip default ports.
        let mut host = raw_host.to_lowercase();
        host = punycode::encode_host(&host).unwrap_or(host);
        host = strip_default_port(&host);

        // Step 3: collapse separators, resolve dot segments, trim trailing slash.
        let path = normalize_path(&raw_path);

        // Step 4: query filtering and byte-order key sort.
        let query_pairs = self.filter_query(raw_query);

        // Step 5: token abstraction, fixed pattern order, with PII audit.
        let mut pii = Vec::new();
        let path = redact(&path, "path", &mut pii);
        let query = self.rebuild_query(query_pairs, &mut pii);

        Ok(CanonicalUrl {
            host,
            path,
            query,
            pii,
        })
    }

    fn filter_query(&self, raw_query: &str) -> Vec<(String, String)> {
        if raw_query.is_empty() {
            return Vec::new();
        }
        let mut pairs: Vec<(String, String)> = Vec::new();
        for piece in raw_query.split('&') {
            if piece.is_empty() {
                continue;
            }
            let (key, value) = match piece.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (piece.to_string(), String::new()),
            };
            if key.is_empty() {
                continue;
            }
            if self.config.drop_keys_exact.iter().any(|k| *k == key) {
                continue;
            }
            if self
                .config
                .drop_keys_prefix
                .iter()
                .any(|p| key.starts_with(p.as_str()))
            {
                continue;
            }
            if !self.config.keep_keys_allowlist.is_empty()
                && !self.config.keep_keys_allowlist.iter().any(|k| *k == key)
            {
                continue;
            }
            if self.config.drop_empty_values && value.is_empty() {
                continue;
            }
            pairs.push((key, value));
        }
        // Byte-order sort on keys; equal keys keep input order.
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    fn rebuild_query(
        &self,
        pairs: Vec<(String, String)>,
        pii: &mut Vec<PiiDetection>,
    ) -> String {
        if pairs.is_empty() {
            return String::new();
        }
        let original: String = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let redacted: Vec<String> = pairs
            .into_iter()
            .map(|(k, v)| {
                let value = redact_field(&v, "query", &original, pii);
                format!("{k}={value}")
            })
            .collect();
        redacted.join("&")
    }
}

fn strip_default_port(host: &str) -> String {
    for suffix in [":80", ":443"] {
        if let Some(stripped) = host.strip_suffix(suffix) {
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }
    host.to_string()
}

fn normalize_path(raw: &str) -> String {
    // Collapse repeated separators, then resolve `.` / `..`.
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Replacement pattern order is fixed; reordering changes signatures.
static PATTERNS: [(PiiKind, &Lazy<Regex>); 6] = [
    (PiiKind::Uuid, &UUID_RE),
    (PiiKind::HexToken, &HEX_RE),
    (PiiKind::Base64Token, &B64_RE),
    (PiiKind::Email, &EMAIL_RE),
    (PiiKind::Ipv4, &IPV4_RE),
    (PiiKind::NumericId, &NUMERIC_RE),
];

fn redact(text: &str, field_source: &'static str, pii: &mut Vec<PiiDetection>) -> String {
    redact_field(text, field_source, text, pii)
}

/// Apply the abstraction patterns to `text`, attributing detections to
/// `original` (the whole pre-redaction field, hashed for the audit trail).
fn redact_field(
    text: &str,
    field_source: &'static str,
    original: &str,
    pii: &mut Vec<PiiDetection>,
) -> String {
    let mut current = text.to_string();
    for (kind, regex) in PATTERNS {
        let mut occurrences = 0u32;
        let replaced = replace_matches(regex, &current, kind, &mut occurrences);
        if occurrences > 0 {
            record_detection(pii, kind, field_source, original, occurrences);
            current = replaced;
        }
    }
    current
}

fn replace_matches(regex: &Regex, text: &str, kind: PiiKind, occurrences: &mut u32) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0usize;
    for found in regex.find_iter(text) {
        // Base64-like tokens must carry at least one digit; long plain words
        // (documentation slugs and the like) are not tokens.
        if kind == PiiKind::Base64Token && !found.as_str().bytes().any(|b| b.is_ascii_digit()) {
            continue;
        }
        out.push_str(&text[last..found.start()]);
        out.push_str(kind.replacement());
        last = found.end();
        *occurrences += 1;
    }
    out.push_str(&text[last..]);
    out
}

fn record_detection(
    pii: &mut Vec<PiiDetection>,
    kind: PiiKind,
    field_source: &'static str,
    original: &str,
    occurrences: u32,
) {
    let original_hash = hex::encode(Sha256::digest(original.as_bytes()));
    if let Some(existing) = pii
        .iter_mut()
        .find(|d| d.kind == kind && d.field_source == field_source)
    {
        existing.occurrences += occurrences;
        return;
    }
    pii.push(PiiDetection {
        kind,
        field_source,
        original_hash,
        occurrences,
    });
}
