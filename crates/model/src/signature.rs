use serde::{Deserialize, Serialize};

/// HTTP methods collapsed into the three groups the signature space knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodGroup {
    Get,
    Write,
    Other,
}

impl MethodGroup {
    pub fn from_method(method: Option<&str>) -> Self {
        let Some(method) = method else {
            return MethodGroup::Other;
        };
        match method.to_ascii_uppercase().as_str() {
            "GET" => MethodGroup::Get,
            "POST" | "PUT" | "PATCH" => MethodGroup::Write,
            _ => MethodGroup::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MethodGroup::Get => "GET",
            MethodGroup::Write => "WRITE",
            MethodGroup::Other => "OTHER",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, MethodGroup::Write)
    }
}

/// Upload-size bucket label. `T` is a size class, not the coverage-sample
/// flag `C`; the two must never be conflated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BytesBucket {
    T,
    L,
    M,
    H,
    X,
}

impl BytesBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            BytesBucket::T => "T",
            BytesBucket::L => "L",
            BytesBucket::M => "M",
            BytesBucket::H => "H",
            BytesBucket::X => "X",
        }
    }
}

/// Content-addressed identifier of a canonical request pattern. Immutable for
/// a given scheme version; a scheme bump defines a disjoint signature space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlSignature {
    /// 64-char lowercase hex sha256 digest.
    pub signature: String,
    pub scheme_version: String,
    pub norm_host: String,
    pub norm_path_template: String,
    pub path_depth: u32,
    pub param_count: u32,
    pub method_group: MethodGroup,
    pub bytes_bucket: BytesBucket,
    pub has_auth_token_like: bool,
}
