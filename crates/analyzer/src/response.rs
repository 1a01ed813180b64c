use serde::Deserialize;
use shadowscan_classify::TaxonomyAdapter;
use shadowscan_model::TaxonomyAssignment;

/// One classification as returned by the model, schema-validated.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseItem {
    pub signature: String,
    pub service_name: String,
    pub usage_type: String,
    pub risk_level: String,
    pub category: String,
    pub confidence: f64,
    pub rationale_short: String,
    pub taxonomy: ResponseTaxonomy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResponseTaxonomy {
    pub fs_code: String,
    pub im_code: String,
    pub uc_codes: Vec<String>,
    pub dt_codes: Vec<String>,
    pub ch_codes: Vec<String>,
    pub rs_codes: Vec<String>,
    pub ev_codes: Vec<String>,
    pub ob_codes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseEnvelope {
    classifications: Vec<ResponseItem>,
}

/// A validated item: the classification plus whether its taxonomy failed
/// cardinality validation (downgrades the record to needs-review).
#[derive(Debug, Clone)]
pub struct ValidatedItem {
    pub item: ResponseItem,
    pub assignment: TaxonomyAssignment,
    pub taxonomy_errors: Vec<String>,
}

const RISK_LEVELS: [&str; 4] = ["low", "medium", "high", "critical"];

/// Parse the model output and validate it against the response schema.
/// Returns `Err(reason)` on JSON or schema violations (the whole batch is
/// retried once with the reason as error context).
pub fn parse_and_validate(
    body: &str,
    expected_signatures: &[String],
    taxonomy: &TaxonomyAdapter,
) -> std::result::Result<Vec<ValidatedItem>, String> {
    let envelope: ResponseEnvelope = serde_json::from_str(body.trim())
        .map_err(|err| format!("invalid JSON: {err}"))?;

    let mut validated = Vec::with_capacity(envelope.classifications.len());
    for item in envelope.classifications {
        if item.signature.is_empty() {
            return Err("item with empty signature".to_string());
        }
        if !expected_signatures.contains(&item.signature) {
            return Err(format!("unexpected signature {:?}", item.signature));
        }
        if item.service_name.trim().is_empty() {
            return Err(format!("{}: empty service_name", item.signature));
        }
        if !(0.0..=1.0).contains(&item.confidence) {
            return Err(format!(
                "{}: confidence {} outside [0, 1]",
                item.signature, item.confidence
            ));
        }
        if !RISK_LEVELS.contains(&item.risk_level.as_str()) {
            return Err(format!(
                "{}: unknown risk_level {:?}",
                item.signature, item.risk_level
            ));
        }

        let mut assignment = TaxonomyAssignment {
            fs_code: item.taxonomy.fs_code.clone(),
            im_code: item.taxonomy.im_code.clone(),
            uc_codes: item.taxonomy.uc_codes.clone(),
            dt_codes: item.taxonomy.dt_codes.clone(),
            ch_codes: item.taxonomy.ch_codes.clone(),
            rs_codes: item.taxonomy.rs_codes.clone(),
            ev_codes: item.taxonomy.ev_codes.clone(),
            ob_codes: item.taxonomy.ob_codes.clone(),
        };
        assignment.canonicalize();
        let taxonomy_errors = taxonomy.validate_assignment(&assignment);
        validated.push(ValidatedItem {
            item,
            assignment,
            taxonomy_errors,
        });
    }
    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadowscan_classify::TaxonomyAdapter;

    fn adapter() -> TaxonomyAdapter {
        TaxonomyAdapter::from_json(
            r#"{
                "version": "1.0",
                "dimensions": {
                    "FS": [{"code": "FS-GEN"}], "IM": [{"code": "IM-WEB"}],
                    "UC": [{"code": "UC-CHAT"}], "DT": [{"code": "DT-TEXT"}],
                    "CH": [{"code": "CH-SAAS"}], "RS": [{"code": "RS-EXFIL"}],
                    "EV": [{"code": "EV-PROXY"}], "OB": [{"code": "OB-PROD"}]
                }
            }"#,
        )
        .unwrap()
    }

    fn valid_body(signature: &str) -> String {
        format!(
            r#"{{"classifications": [{{
                "signature": "{signature}",
                "service_name": "ChatGPT",
                "usage_type": "genai_web",
                "risk_level": "high",
                "category": "GenAI",
                "confidence": 0.92,
                "rationale_short": "chat completion endpoint",
                "taxonomy": {{
                    "fs_code": "FS-GEN", "im_code": "IM-WEB",
                    "uc_codes": ["UC-CHAT"], "dt_codes": ["DT-TEXT"],
                    "ch_codes": ["CH-SAAS"], "rs_codes": ["RS-EXFIL"],
                    "ev_codes": ["EV-PROXY"], "ob_codes": []
                }}
            }}]}}"#
        )
    }

    #[test]
    fn valid_response_parses() {
        let expected = vec!["sig1".to_string()];
        let validated = parse_and_validate(&valid_body("sig1"), &expected, &adapter()).unwrap();
        assert_eq!(validated.len(), 1);
        assert!(validated[0].taxonomy_errors.is_empty());
        assert_eq!(validated[0].item.service_name, "ChatGPT");
    }

    #[test]
    fn invalid_json_is_a_schema_error() {
        let expected = vec!["sig1".to_string()];
        assert!(parse_and_validate("not json", &expected, &adapter()).is_err());
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let body = valid_body("sig1").replace("0.92", "1.5");
        let expected = vec!["sig1".to_string()];
        let err = parse_and_validate(&body, &expected, &adapter()).unwrap_err();
        assert!(err.contains("confidence"));
    }

    #[test]
    fn unexpected_signature_is_rejected() {
        let expected = vec!["other".to_string()];
        assert!(parse_and_validate(&valid_body("sig1"), &expected, &adapter()).is_err());
    }

    #[test]
    fn missing_required_dimension_downgrades_not_rejects() {
        let body = valid_body("sig1").replace(r#""uc_codes": ["UC-CHAT"],"#, r#""uc_codes": [],"#);
        let expected = vec!["sig1".to_string()];
        let validated = parse_and_validate(&body, &expected, &adapter()).unwrap();
        assert!(!validated[0].taxonomy_errors.is_empty());
    }

    #[test]
    fn taxonomy_arrays_are_canonicalized() {
        let body = valid_body("sig1").replace(
            r#""dt_codes": ["DT-TEXT"],"#,
            r#""dt_codes": ["DT-TEXT", "DT-TEXT"],"#,
        );
        let expected = vec!["sig1".to_string()];
        let validated = parse_and_validate(&body, &expected, &adapter()).unwrap();
        assert_eq!(validated[0].assignment.dt_codes, vec!["DT-TEXT"]);
    }
}
