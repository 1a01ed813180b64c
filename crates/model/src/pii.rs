use serde::{Deserialize, Serialize};

/// Kinds of personally-identifying tokens the canonicalizer redacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Uuid,
    HexToken,
    Base64Token,
    Email,
    Ipv4,
    NumericId,
}

impl PiiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiKind::Uuid => "uuid",
            PiiKind::HexToken => "hex_token",
            PiiKind::Base64Token => "base64_token",
            PiiKind::Email => "email",
            PiiKind::Ipv4 => "ipv4",
            PiiKind::NumericId => "numeric_id",
        }
    }

    /// The abstraction token substituted into the normalized URL.
    pub fn replacement(&self) -> &'static str {
        match self {
            PiiKind::Uuid => ":uuid",
            PiiKind::HexToken => ":hex",
            PiiKind::Base64Token => ":tok",
            PiiKind::Email => ":email",
            PiiKind::Ipv4 => ":ip",
            PiiKind::NumericId => ":id",
        }
    }
}

/// One redaction event. Append-only; the original value is retained only as
/// a sha256 for audit traceability, never for reversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiAuditRecord {
    pub run_id: String,
    pub url_signature: String,
    pub kind: PiiKind,
    /// Which field the token was found in (`path` or `query`).
    pub field_source: String,
    pub redaction_token: String,
    pub original_hash: String,
    pub occurrence_count: u32,
}
