use crate::{NormalizeError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

/// Parsed Public Suffix List snapshot.
///
/// The snapshot is a pinned local input: its hash is recorded on the run and
/// there is no heuristic fallback. Construction fails if the file is missing
/// or carries no rules.
#[derive(Debug, Clone)]
pub struct PublicSuffixList {
    exact: HashSet<String>,
    /// Rule `*.foo` stored as `foo`.
    wildcard: HashSet<String>,
    /// Rule `!bar.foo` stored as `bar.foo`.
    exception: HashSet<String>,
    snapshot_hash: String,
}

impl PublicSuffixList {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|err| {
            NormalizeError::PslUnavailable(format!("{}: {err}", path.display()))
        })?;
        let snapshot_hash = hex::encode(Sha256::digest(&bytes));
        let text = String::from_utf8_lossy(&bytes);
        let list = Self::parse(&text, snapshot_hash)?;
        if list.exact.is_empty() && list.wildcard.is_empty() {
            return Err(NormalizeError::PslEmpty(path.display().to_string()));
        }
        Ok(list)
    }

    pub fn parse(text: &str, snapshot_hash: String) -> Result<Self> {
        let mut exact = HashSet::new();
        let mut wildcard = HashSet::new();
        let mut exception = HashSet::new();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            // The list is defined on the first whitespace-delimited token.
            let rule = line.split_whitespace().next().unwrap_or("");
            let rule = rule.to_lowercase();
            if let Some(rest) = rule.strip_prefix('!') {
                exception.insert(rest.to_string());
            } else if let Some(rest) = rule.strip_prefix("*.") {
                wildcard.insert(rest.to_string());
            } else if !rule.is_empty() {
                exact.insert(rule);
            }
        }

        Ok(Self {
            exact,
            wildcard,
            exception,
            snapshot_hash,
        })
    }

    pub fn snapshot_hash(&self) -> &str {
        &self.snapshot_hash
    }

    /// Number of labels in the public suffix of `host`, or 0 when no rule
    /// matches (unknown TLDs fall back to the implicit `*` rule: 1 label).
    fn suffix_labels(&self, labels: &[&str]) -> usize {
        let mut best = 1; // implicit "*" rule
        for start in 0..labels.len() {
            let candidate = labels[start..].join(".");
            if self.exception.contains(&candidate) {
                // Exception rules take priority and shrink the suffix by one label.
                return labels.len() - start - 1;
            }
            if self.exact.contains(&candidate) {
                best = best.max(labels.len() - start);
            }
            // `*.rest` matches a candidate of the form X.rest.
            if start + 1 < labels.len() {
                let rest = labels[start + 1..].join(".");
                if self.wildcard.contains(&rest) {
                    best = best.max(labels.len() - start);
                }
            }
        }
        best
    }

    /// Registrable domain (eTLD+1). Returns the host unchanged when it is
    /// itself a public suffix or empty.
    pub fn registrable_domain(&self, host: &str) -> String {
        let host = host.split(':').next().unwrap_or(host);
        let host = host.trim_end_matches('.').to_lowercase();
        if host.is_empty() || host.parse::<std::net::Ipv4Addr>().is_ok() {
            return host;
        }
        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() < 2 {
            return host;
        }
        let suffix_len = self.suffix_labels(&labels);
        if suffix_len >= labels.len() {
            return host;
        }
        labels[labels.len() - suffix_len - 1..].join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::PublicSuffixList;

    fn sample() -> PublicSuffixList {
        let text = "\
// test list
com
jp
co.jp
uk
co.uk
*.ck
!www.ck
";
        PublicSuffixList::parse(text, "testhash".to_string()).unwrap()
    }

    #[test]
    fn simple_tld() {
        let psl = sample();
        assert_eq!(psl.registrable_domain("www.example.com"), "example.com");
        assert_eq!(psl.registrable_domain("example.com"), "example.com");
    }

    #[test]
    fn multi_label_suffix() {
        let psl = sample();
        assert_eq!(psl.registrable_domain("www.example.co.jp"), "example.co.jp");
        assert_eq!(psl.registrable_domain("a.b.example.co.uk"), "example.co.uk");
    }

    #[test]
    fn wildcard_and_exception_rules() {
        let psl = sample();
        // *.ck makes foo.ck a public suffix, so bar.foo.ck registers.
        assert_eq!(psl.registrable_domain("bar.foo.ck"), "bar.foo.ck");
        // !www.ck carves www.ck back out as registrable.
        assert_eq!(psl.registrable_domain("www.ck"), "www.ck");
        assert_eq!(psl.registrable_domain("sub.www.ck"), "www.ck");
    }

    #[test]
    fn unknown_tld_uses_implicit_rule() {
        let psl = sample();
        assert_eq!(psl.registrable_domain("host.internal"), "host.internal");
        assert_eq!(psl.registrable_domain("a.host.internal"), "host.internal");
    }

    #[test]
    fn host_that_is_a_suffix_is_returned_as_is() {
        let psl = sample();
        assert_eq!(psl.registrable_domain("co.jp"), "co.jp");
    }

    #[test]
    fn ipv4_hosts_pass_through() {
        let psl = sample();
        assert_eq!(psl.registrable_domain("10.0.0.1"), "10.0.0.1");
    }
}
