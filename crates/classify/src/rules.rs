use crate::taxonomy::TaxonomyAdapter;
use crate::{ClassifyError, Result};
use serde::{Deserialize, Serialize};
use shadowscan_model::TaxonomyAssignment;
use std::path::Path;

/// Host/path patterns one rule matches on. A rule must carry at least one
/// pattern; path prefixes only narrow a host match, they never match alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleMatchSpec {
    pub host_exact: Vec<String>,
    /// Matches the host itself or any subdomain of it.
    pub domain_suffixes: Vec<String>,
    pub path_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(rename = "match")]
    pub match_spec: RuleMatchSpec,
    pub service_name: String,
    pub category: String,
    pub risk_level: String,
    pub usage_type: String,
    /// Partial assignments are completed with fallback codes; an absent
    /// taxonomy means the rule cannot classify and the signature goes to
    /// the LLM instead.
    #[serde(default)]
    pub taxonomy: Option<TaxonomyAssignment>,
}

/// The verdict a rule produces for a signature.
#[derive(Debug, Clone)]
pub struct RuleVerdict {
    pub rule_id: String,
    pub service_name: String,
    pub category: String,
    pub risk_level: String,
    pub usage_type: String,
    pub taxonomy: TaxonomyAssignment,
}

/// Declarative rule set with "longest match wins, then highest priority"
/// resolution; ties break on stable rule order.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
    version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleDocument {
    rule_version: String,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn load(path: &Path) -> Result<Self> {
        let document: RuleDocument = serde_json::from_slice(&std::fs::read(path)?)?;
        Self::from_document(document)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Self::from_document(serde_json::from_str(text)?)
    }

    fn from_document(document: RuleDocument) -> Result<Self> {
        for rule in &document.rules {
            let spec = &rule.match_spec;
            if spec.host_exact.is_empty() && spec.domain_suffixes.is_empty() {
                return Err(ClassifyError::InvalidRules(format!(
                    "rule {} has no host patterns",
                    rule.rule_id
                )));
            }
            if rule.rule_id.trim().is_empty() {
                return Err(ClassifyError::InvalidRules("rule with empty id".to_string()));
            }
        }
        Ok(Self {
            rules: document.rules,
            version: document.rule_version,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Classify one signature. Returns `None` when no rule matches or the
    /// winning rule carries no taxonomy (the signature then goes to the LLM).
    pub fn classify(
        &self,
        norm_host: &str,
        dest_domain: &str,
        path_template: &str,
        taxonomy: &TaxonomyAdapter,
    ) -> Result<Option<RuleVerdict>> {
        // (match length, priority, negated index): max wins, stable on ties.
        let mut best: Option<(usize, i64, isize, &Rule)> = None;

        for (index, rule) in self.rules.iter().enumerate() {
            let Some(host_len) = match_host(&rule.match_spec, norm_host, dest_domain) else {
                continue;
            };
            let path_len = match match_path(&rule.match_spec, path_template) {
                Some(len) => len,
                None => continue,
            };
            let candidate = (host_len + path_len, rule.priority, -(index as isize), rule);
            let better = match &best {
                Some((len, priority, order, _)) => {
                    (candidate.0, candidate.1, candidate.2) > (*len, *priority, *order)
                }
                None => true,
            };
            if better {
                best = Some(candidate);
            }
        }

        let Some((_, _, _, rule)) = best else {
            return Ok(None);
        };
        let Some(mut assignment) = rule.taxonomy.clone() else {
            log::debug!("rule {} matched without taxonomy; deferring to LLM", rule.rule_id);
            return Ok(None);
        };
        taxonomy.complete_with_fallbacks(&mut assignment)?;

        Ok(Some(RuleVerdict {
            rule_id: rule.rule_id.clone(),
            service_name: rule.service_name.clone(),
            category: rule.category.clone(),
            risk_level: rule.risk_level.clone(),
            usage_type: rule.usage_type.clone(),
            taxonomy: assignment,
        }))
    }
}

/// Length of the host pattern that matched, or `None`.
fn match_host(spec: &RuleMatchSpec, norm_host: &str, dest_domain: &str) -> Option<usize> {
    let mut best: Option<usize> = None;
    for exact in &spec.host_exact {
        if exact == norm_host || exact == dest_domain {
            best = Some(best.map_or(exact.len(), |b| b.max(exact.len())));
        }
    }
    for suffix in &spec.domain_suffixes {
        let bare = suffix.trim_start_matches('.');
        let matches = norm_host == bare
            || dest_domain == bare
            || norm_host.ends_with(&format!(".{bare}"))
            || dest_domain.ends_with(&format!(".{bare}"));
        if matches {
            best = Some(best.map_or(bare.len(), |b| b.max(bare.len())));
        }
    }
    best
}

/// Length of the longest matching path prefix; 0 when the rule has no path
/// patterns, `None` when it has patterns and none match.
fn match_path(spec: &RuleMatchSpec, path_template: &str) -> Option<usize> {
    if spec.path_prefixes.is_empty() {
        return Some(0);
    }
    spec.path_prefixes
        .iter()
        .filter(|prefix| path_template.starts_with(prefix.as_str()))
        .map(|prefix| prefix.len())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::test_artifact_json;

    fn adapter() -> TaxonomyAdapter {
        TaxonomyAdapter::from_json(test_artifact_json()).unwrap()
    }

    fn rules_json() -> &'static str {
        r#"{
            "rule_version": "3",
            "rules": [
                {
                    "rule_id": "generic-ai",
                    "priority": 1,
                    "match": {"domain_suffixes": ["openai.com"]},
                    "service_name": "OpenAI",
                    "category": "GenAI",
                    "risk_level": "medium",
                    "usage_type": "genai_web",
                    "taxonomy": {
                        "fs_code": "FS-GEN", "im_code": "IM-WEB",
                        "uc_codes": ["UC-CHAT"], "dt_codes": ["DT-TEXT"],
                        "ch_codes": ["CH-SAAS"], "rs_codes": ["RS-EXFIL"],
                        "ev_codes": ["EV-PROXY"], "ob_codes": []
                    }
                },
                {
                    "rule_id": "api-endpoint",
                    "priority": 5,
                    "match": {"domain_suffixes": ["openai.com"], "path_prefixes": ["/v1"]},
                    "service_name": "OpenAI API",
                    "category": "GenAI",
                    "risk_level": "high",
                    "usage_type": "genai_api",
                    "taxonomy": {
                        "fs_code": "FS-GEN", "im_code": "IM-API",
                        "uc_codes": ["UC-CODE"], "dt_codes": ["DT-TEXT"],
                        "ch_codes": ["CH-SAAS"], "rs_codes": ["RS-EXFIL"],
                        "ev_codes": ["EV-PROXY"], "ob_codes": []
                    }
                },
                {
                    "rule_id": "no-taxonomy",
                    "priority": 99,
                    "match": {"host_exact": ["bare.example.com"]},
                    "service_name": "Bare",
                    "category": "Unknown",
                    "risk_level": "unknown",
                    "usage_type": "unknown"
                },
                {
                    "rule_id": "partial-taxonomy",
                    "match": {"host_exact": ["partial.example.com"]},
                    "service_name": "Partial",
                    "category": "SaaS",
                    "risk_level": "low",
                    "usage_type": "business",
                    "taxonomy": {"fs_code": "FS-EMB", "im_code": "IM-API"}
                }
            ]
        }"#
    }

    #[test]
    fn longest_match_beats_shorter() {
        let rules = RuleSet::from_json(rules_json()).unwrap();
        let verdict = rules
            .classify("api.openai.com", "openai.com", "/v1/chat?p=1", &adapter())
            .unwrap()
            .unwrap();
        assert_eq!(verdict.rule_id, "api-endpoint");
        assert_eq!(verdict.usage_type, "genai_api");
    }

    #[test]
    fn host_only_match_falls_back_to_generic() {
        let rules = RuleSet::from_json(rules_json()).unwrap();
        let verdict = rules
            .classify("chat.openai.com", "openai.com", "/home", &adapter())
            .unwrap()
            .unwrap();
        assert_eq!(verdict.rule_id, "generic-ai");
    }

    #[test]
    fn no_match_returns_none() {
        let rules = RuleSet::from_json(rules_json()).unwrap();
        assert!(rules
            .classify("example.org", "example.org", "/", &adapter())
            .unwrap()
            .is_none());
    }

    #[test]
    fn rule_without_taxonomy_defers_to_llm() {
        let rules = RuleSet::from_json(rules_json()).unwrap();
        assert!(rules
            .classify("bare.example.com", "example.com", "/", &adapter())
            .unwrap()
            .is_none());
    }

    #[test]
    fn partial_taxonomy_is_completed_with_fallbacks() {
        let rules = RuleSet::from_json(rules_json()).unwrap();
        let verdict = rules
            .classify("partial.example.com", "example.com", "/", &adapter())
            .unwrap()
            .unwrap();
        assert_eq!(verdict.taxonomy.fs_code, "FS-EMB");
        assert_eq!(verdict.taxonomy.uc_codes, vec!["UC-UNK"]);
        assert!(adapter().validate_assignment(&verdict.taxonomy).is_empty());
    }

    #[test]
    fn classification_is_deterministic() {
        let rules = RuleSet::from_json(rules_json()).unwrap();
        let first = rules
            .classify("api.openai.com", "openai.com", "/v1/x", &adapter())
            .unwrap()
            .unwrap();
        let second = rules
            .classify("api.openai.com", "openai.com", "/v1/x", &adapter())
            .unwrap()
            .unwrap();
        assert_eq!(first.rule_id, second.rule_id);
        assert_eq!(first.taxonomy, second.taxonomy);
    }

    #[test]
    fn rules_without_host_patterns_are_rejected() {
        let bad = r#"{"rule_version": "1", "rules": [{
            "rule_id": "r", "match": {"path_prefixes": ["/x"]},
            "service_name": "s", "category": "c",
            "risk_level": "low", "usage_type": "u"
        }]}"#;
        assert!(RuleSet::from_json(bad).is_err());
    }
}
