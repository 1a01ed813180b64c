use serde::{Deserialize, Serialize};

/// Upload-size bucket boundaries in bytes. A value lands in the first bucket
/// whose upper bound exceeds it; everything at or above `x_min` is `X`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytesBucketThresholds {
    pub t_max: u64,
    pub l_max: u64,
    pub m_max: u64,
    pub h_max: u64,
}

impl Default for BytesBucketThresholds {
    fn default() -> Self {
        Self {
            t_max: 1024,              // < 1 KiB
            l_max: 100 * 1024,        // < 100 KiB
            m_max: 1024 * 1024,       // < 1 MiB
            h_max: 10 * 1024 * 1024,  // < 10 MiB
        }
    }
}

/// Configuration for the canonicalizer and signature builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub signature_scheme_version: String,
    /// Query keys dropped by exact match.
    pub drop_keys_exact: Vec<String>,
    /// Query keys dropped by prefix match.
    pub drop_keys_prefix: Vec<String>,
    /// If non-empty, only these keys survive ("key-param subset").
    pub keep_keys_allowlist: Vec<String>,
    pub drop_empty_values: bool,
    pub bytes_buckets: BytesBucketThresholds,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            signature_scheme_version: "1.0".to_string(),
            drop_keys_exact: [
                "gclid", "fbclid", "ref", "session", "sid", "phpsessid", "mc_cid", "mc_eid",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            drop_keys_prefix: vec!["utm_".to_string()],
            keep_keys_allowlist: Vec::new(),
            drop_empty_values: true,
            bytes_buckets: BytesBucketThresholds::default(),
        }
    }
}

impl NormalizerConfig {
    pub fn validate(&self) -> crate::Result<()> {
        let b = &self.bytes_buckets;
        if !(b.t_max < b.l_max && b.l_max < b.m_max && b.m_max < b.h_max) {
            return Err(crate::NormalizeError::InvalidConfig(
                "bytes bucket thresholds must be strictly increasing".to_string(),
            ));
        }
        if self.signature_scheme_version.is_empty() {
            return Err(crate::NormalizeError::InvalidConfig(
                "signature_scheme_version must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
