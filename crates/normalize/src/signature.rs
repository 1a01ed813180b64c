use crate::config::NormalizerConfig;
use sha2::{Digest, Sha256};
use shadowscan_model::{BytesBucket, MethodGroup, UrlSignature};

/// Inputs that define a signature. Everything else about the request is
/// deliberately outside the identity.
#[derive(Debug, Clone)]
pub struct SignatureInput<'a> {
    pub norm_host: &'a str,
    pub norm_path: &'a str,
    pub norm_query: &'a str,
    pub http_method: Option<&'a str>,
    pub bytes_sent: u64,
}

/// Derives the content-addressed signature of a canonical request pattern.
#[derive(Debug, Clone)]
pub struct SignatureBuilder {
    config: NormalizerConfig,
}

impl SignatureBuilder {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn scheme_version(&self) -> &str {
        &self.config.signature_scheme_version
    }

    pub fn bytes_bucket(&self, bytes_sent: u64) -> BytesBucket {
        let b = &self.config.bytes_buckets;
        if bytes_sent < b.t_max {
            BytesBucket::T
        } else if bytes_sent < b.l_max {
            BytesBucket::L
        } else if bytes_sent < b.m_max {
            BytesBucket::M
        } else if bytes_sent < b.h_max {
            BytesBucket::H
        } else {
            BytesBucket::X
        }
    }

    /// Path template: the normalized path plus a parameter-count marker.
    /// Values never enter the template; the count alone is enough to keep
    /// parameterized endpoints distinct.
    pub fn path_template(norm_path: &str, norm_query: &str) -> String {
        let param_count = query_param_count(norm_query);
        if param_count > 0 {
            format!("{norm_path}?p={param_count}")
        } else {
            norm_path.to_string()
        }
    }

    /// The allow-listed query pairs that participate in the identity,
    /// re-sorted for determinism. Empty allow-list means empty subset.
    fn key_param_subset(&self, norm_query: &str) -> String {
        if self.config.keep_keys_allowlist.is_empty() || norm_query.is_empty() {
            return String::new();
        }
        let mut kept: Vec<&str> = norm_query
            .split('&')
            .filter(|pair| {
                let key = pair.split('=').next().unwrap_or("");
                self.config.keep_keys_allowlist.iter().any(|k| k == key)
            })
            .collect();
        kept.sort_unstable();
        kept.join("&")
    }

    pub fn build(&self, input: &SignatureInput<'_>) -> UrlSignature {
        let path_template = Self::path_template(input.norm_path, input.norm_query);
        let method_group = MethodGroup::from_method(input.http_method);
        let bytes_bucket = self.bytes_bucket(input.bytes_sent);
        let key_param_subset = self.key_param_subset(input.norm_query);

        let preimage = [
            input.norm_host,
            path_template.as_str(),
            key_param_subset.as_str(),
            method_group.as_str(),
            bytes_bucket.as_str(),
            self.config.signature_scheme_version.as_str(),
        ]
        .join("|");
        let signature = hex::encode(Sha256::digest(preimage.as_bytes()));

        let path_depth = input
            .norm_path
            .split('/')
            .filter(|s| !s.is_empty())
            .count() as u32;
        let param_count = query_param_count(input.norm_query) as u32;
        let has_auth_token_like = looks_auth_token_like(input.norm_query);

        UrlSignature {
            signature,
            scheme_version: self.config.signature_scheme_version.clone(),
            norm_host: input.norm_host.to_string(),
            norm_path_template: path_template,
            path_depth,
            param_count,
            method_group,
            bytes_bucket,
            has_auth_token_like,
        }
    }
}

fn query_param_count(norm_query: &str) -> usize {
    if norm_query.is_empty() {
        0
    } else {
        norm_query.split('&').count()
    }
}

fn looks_auth_token_like(norm_query: &str) -> bool {
    if norm_query.is_empty() {
        return false;
    }
    let lower = norm_query.to_lowercase();
    ["token", "auth", "key", "secret", "session", "jwt"]
        .iter()
        .any(|kw| lower.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalizerConfig;

    fn builder() -> SignatureBuilder {
        SignatureBuilder::new(NormalizerConfig::default())
    }

    #[test]
    fn signature_is_stable_across_invocations() {
        let input = SignatureInput {
            norm_host: "example.com",
            norm_path: "/Foo",
            norm_query: "",
            http_method: Some("GET"),
            bytes_sent: 2048,
        };
        let first = builder().build(&input);
        let second = builder().build(&input);
        assert_eq!(first.signature, second.signature);
        assert_eq!(first.signature.len(), 64);
        assert!(first.signature.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(first.bytes_bucket, BytesBucket::L);
        assert_eq!(first.method_group, MethodGroup::Get);
    }

    #[test]
    fn scheme_version_change_changes_signature() {
        let input = SignatureInput {
            norm_host: "example.com",
            norm_path: "/a",
            norm_query: "",
            http_method: Some("GET"),
            bytes_sent: 0,
        };
        let v1 = builder().build(&input);
        let mut config = NormalizerConfig::default();
        config.signature_scheme_version = "2.0".to_string();
        let v2 = SignatureBuilder::new(config).build(&input);
        assert_ne!(v1.signature, v2.signature);
    }

    #[test]
    fn method_groups_partition_methods() {
        assert_eq!(MethodGroup::from_method(Some("get")), MethodGroup::Get);
        assert_eq!(MethodGroup::from_method(Some("POST")), MethodGroup::Write);
        assert_eq!(MethodGroup::from_method(Some("PUT")), MethodGroup::Write);
        assert_eq!(MethodGroup::from_method(Some("PATCH")), MethodGroup::Write);
        assert_eq!(MethodGroup::from_method(Some("DELETE")), MethodGroup::Other);
        assert_eq!(MethodGroup::from_method(None), MethodGroup::Other);
    }

    #[test]
    fn bytes_buckets_follow_thresholds() {
        let b = builder();
        assert_eq!(b.bytes_bucket(0), BytesBucket::T);
        assert_eq!(b.bytes_bucket(1023), BytesBucket::T);
        assert_eq!(b.bytes_bucket(1024), BytesBucket::L);
        assert_eq!(b.bytes_bucket(100 * 1024), BytesBucket::M);
        assert_eq!(b.bytes_bucket(1024 * 1024), BytesBucket::H);
        assert_eq!(b.bytes_bucket(20 * 1024 * 1024), BytesBucket::X);
    }

    #[test]
    fn path_template_counts_params() {
        assert_eq!(SignatureBuilder::path_template("/a/b", ""), "/a/b");
        assert_eq!(SignatureBuilder::path_template("/a/b", "x=1&y=2"), "/a/b?p=2");
    }

    #[test]
    fn key_param_subset_respects_allowlist() {
        let mut config = NormalizerConfig::default();
        config.keep_keys_allowlist = vec!["v".to_string(), "api".to_string()];
        let b = SignatureBuilder::new(config);
        let with_subset = b.build(&SignatureInput {
            norm_host: "example.com",
            norm_path: "/x",
            norm_query: "api=2&v=1",
            http_method: Some("GET"),
            bytes_sent: 0,
        });
        let without = builder().build(&SignatureInput {
            norm_host: "example.com",
            norm_path: "/x",
            norm_query: "api=2&v=1",
            http_method: Some("GET"),
            bytes_sent: 0,
        });
        assert_ne!(with_subset.signature, without.signature);
    }

    #[test]
    fn auth_token_heuristic() {
        let sig = builder().build(&SignatureInput {
            norm_host: "example.com",
            norm_path: "/x",
            norm_query: "access_token=:tok",
            http_method: Some("GET"),
            bytes_sent: 0,
        });
        assert!(sig.has_auth_token_like);
    }
}
