use crate::{ClassifyError, Result};
use serde::{Deserialize, Serialize};
use shadowscan_model::TaxonomyAssignment;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// The eight dimensions, in canonical order.
pub const ALL_DIMENSIONS: [&str; 8] = ["FS", "IM", "UC", "DT", "CH", "RS", "EV", "OB"];

/// (min, max) cardinality per dimension; max `None` means unbounded.
fn cardinality(dimension: &str) -> Option<(usize, Option<usize>)> {
    match dimension {
        "FS" | "IM" => Some((1, Some(1))),
        "UC" | "DT" | "CH" | "RS" | "EV" => Some((1, None)),
        "OB" => Some((0, None)),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactCode {
    code: String,
    #[serde(default)]
    label: String,
}

/// On-disk shape of the pinned taxonomy artifact (`codes.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactDocument {
    version: String,
    dimensions: BTreeMap<String, Vec<ArtifactCode>>,
    /// Per-dimension fallback code applied when a classifier supplies
    /// nothing for a required dimension.
    #[serde(default)]
    fallback_codes: BTreeMap<String, String>,
}

/// Legacy single-value taxonomy columns, read-only compatibility surface.
#[derive(Debug, Clone, Default)]
pub struct LegacyTaxonomy {
    pub fs_uc_code: Option<String>,
    pub dt_code: Option<String>,
    pub ch_code: Option<String>,
    pub rs_code: Option<String>,
    pub ev_code: Option<String>,
    pub ob_code: Option<String>,
}

impl LegacyTaxonomy {
    pub fn is_empty(&self) -> bool {
        self.fs_uc_code.is_none()
            && self.dt_code.is_none()
            && self.ch_code.is_none()
            && self.rs_code.is_none()
            && self.ev_code.is_none()
            && self.ob_code.is_none()
    }
}

/// Read-only view over the pinned taxonomy artifact: allowed codes,
/// cardinality rules, assignment validation, legacy normalization.
#[derive(Debug, Clone)]
pub struct TaxonomyAdapter {
    version: String,
    codes_by_dimension: BTreeMap<String, Vec<String>>,
    known_codes: HashSet<String>,
    fallback_codes: BTreeMap<String, String>,
}

impl TaxonomyAdapter {
    /// Load `codes.json` from an artifact directory.
    pub fn load(artifact_dir: &Path) -> Result<Self> {
        let path = artifact_dir.join("codes.json");
        if !path.exists() {
            return Err(ClassifyError::ArtifactMissing(path.display().to_string()));
        }
        let document: ArtifactDocument = serde_json::from_slice(&std::fs::read(&path)?)?;
        Self::from_document(document)
    }

    /// Build an adapter directly from artifact JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Self::from_document(serde_json::from_str(text)?)
    }

    fn from_document(document: ArtifactDocument) -> Result<Self> {
        for dimension in document.dimensions.keys() {
            if cardinality(dimension).is_none() {
                return Err(ClassifyError::UnknownDimension(dimension.clone()));
            }
        }
        for dimension in ALL_DIMENSIONS {
            let present = document
                .dimensions
                .get(dimension)
                .map(|codes| !codes.is_empty())
                .unwrap_or(false);
            if !present {
                return Err(ClassifyError::InvalidArtifact(format!(
                    "dimension {dimension} has no codes"
                )));
            }
        }
        let codes_by_dimension: BTreeMap<String, Vec<String>> = document
            .dimensions
            .iter()
            .map(|(dim, codes)| {
                (
                    dim.clone(),
                    codes.iter().map(|c| c.code.clone()).collect::<Vec<_>>(),
                )
            })
            .collect();
        let known_codes = codes_by_dimension
            .values()
            .flatten()
            .cloned()
            .collect::<HashSet<_>>();
        Ok(Self {
            version: document.version,
            codes_by_dimension,
            known_codes,
            fallback_codes: document.fallback_codes,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn allowed_codes(&self, dimension: &str) -> Result<&[String]> {
        self.codes_by_dimension
            .get(dimension)
            .map(|v| v.as_slice())
            .ok_or_else(|| ClassifyError::UnknownDimension(dimension.to_string()))
    }

    pub fn cardinality(&self, dimension: &str) -> Result<(usize, Option<usize>)> {
        cardinality(dimension).ok_or_else(|| ClassifyError::UnknownDimension(dimension.to_string()))
    }

    /// Fallback code for a dimension; the artifact may override, otherwise
    /// the first allowed code of the dimension is used.
    pub fn fallback_code(&self, dimension: &str) -> Result<String> {
        if let Some(code) = self.fallback_codes.get(dimension) {
            return Ok(code.clone());
        }
        Ok(self.allowed_codes(dimension)?[0].clone())
    }

    /// Validate an assignment against cardinality and allowed codes.
    /// Returns the violations; an empty list means valid.
    pub fn validate_assignment(&self, assignment: &TaxonomyAssignment) -> Vec<String> {
        let mut errors = Vec::new();
        let dims: [(&str, Vec<&String>); 8] = [
            ("FS", singleton(&assignment.fs_code)),
            ("IM", singleton(&assignment.im_code)),
            ("UC", assignment.uc_codes.iter().collect()),
            ("DT", assignment.dt_codes.iter().collect()),
            ("CH", assignment.ch_codes.iter().collect()),
            ("RS", assignment.rs_codes.iter().collect()),
            ("EV", assignment.ev_codes.iter().collect()),
            ("OB", assignment.ob_codes.iter().collect()),
        ];
        for (dimension, codes) in dims {
            let (min, max) = cardinality(dimension).unwrap_or((0, None));
            if codes.len() < min {
                errors.push(format!(
                    "{dimension}: at least {min} code(s) required, got {}",
                    codes.len()
                ));
            }
            if let Some(max) = max {
                if codes.len() > max {
                    errors.push(format!(
                        "{dimension}: at most {max} code(s) allowed, got {}",
                        codes.len()
                    ));
                }
            }
            for code in codes {
                if !self.known_codes.contains(code.as_str()) {
                    errors.push(format!("{dimension}: unknown code {code:?}"));
                } else if !self
                    .codes_by_dimension
                    .get(dimension)
                    .map(|allowed| allowed.contains(code))
                    .unwrap_or(false)
                {
                    errors.push(format!("{dimension}: code {code:?} belongs to another dimension"));
                }
            }
        }
        errors
    }

    /// Fill unset dimensions with fallback codes, then canonicalize.
    pub fn complete_with_fallbacks(&self, assignment: &mut TaxonomyAssignment) -> Result<()> {
        if assignment.fs_code.is_empty() {
            assignment.fs_code = self.fallback_code("FS")?;
        }
        if assignment.im_code.is_empty() {
            assignment.im_code = self.fallback_code("IM")?;
        }
        for (dimension, codes) in [
            ("UC", &mut assignment.uc_codes),
            ("DT", &mut assignment.dt_codes),
            ("CH", &mut assignment.ch_codes),
            ("RS", &mut assignment.rs_codes),
            ("EV", &mut assignment.ev_codes),
        ] {
            if codes.is_empty() {
                codes.push(self.fallback_code(dimension)?);
            }
        }
        assignment.canonicalize();
        Ok(())
    }

    /// Lift legacy single-value columns into array form. Returns the lifted
    /// assignment and `true` when the record must be queued for review
    /// (only legacy data was present).
    pub fn lift_legacy(&self, legacy: &LegacyTaxonomy) -> (TaxonomyAssignment, bool) {
        let mut assignment = TaxonomyAssignment::default();
        let mut lifted = false;
        if let Some(code) = &legacy.fs_uc_code {
            // The combined legacy column maps onto UC; FS takes the fallback.
            assignment.uc_codes.push(code.clone());
            lifted = true;
        }
        for (value, target) in [
            (&legacy.dt_code, &mut assignment.dt_codes),
            (&legacy.ch_code, &mut assignment.ch_codes),
            (&legacy.rs_code, &mut assignment.rs_codes),
            (&legacy.ev_code, &mut assignment.ev_codes),
            (&legacy.ob_code, &mut assignment.ob_codes),
        ] {
            if let Some(code) = value {
                target.push(code.clone());
                lifted = true;
            }
        }
        assignment.canonicalize();
        (assignment, lifted)
    }
}

fn singleton(code: &String) -> Vec<&String> {
    if code.is_empty() {
        Vec::new()
    } else {
        vec![code]
    }
}

#[cfg(test)]
pub(crate) fn test_artifact_json() -> &'static str {
    r#"{
        "version": "1.0",
        "dimensions": {
            "FS": [{"code": "FS-GEN"}, {"code": "FS-EMB"}],
            "IM": [{"code": "IM-WEB"}, {"code": "IM-API"}],
            "UC": [{"code": "UC-CHAT"}, {"code": "UC-CODE"}, {"code": "UC-UNK"}],
            "DT": [{"code": "DT-TEXT"}, {"code": "DT-UNK"}],
            "CH": [{"code": "CH-SAAS"}, {"code": "CH-UNK"}],
            "RS": [{"code": "RS-EXFIL"}, {"code": "RS-UNK"}],
            "EV": [{"code": "EV-PROXY"}, {"code": "EV-UNK"}],
            "OB": [{"code": "OB-PROD"}]
        },
        "fallback_codes": {
            "UC": "UC-UNK", "DT": "DT-UNK", "CH": "CH-UNK",
            "RS": "RS-UNK", "EV": "EV-UNK"
        }
    }"#
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> TaxonomyAdapter {
        TaxonomyAdapter::from_json(super::test_artifact_json()).unwrap()
    }

    fn valid_assignment() -> TaxonomyAssignment {
        TaxonomyAssignment {
            fs_code: "FS-GEN".to_string(),
            im_code: "IM-WEB".to_string(),
            uc_codes: vec!["UC-CHAT".to_string()],
            dt_codes: vec!["DT-TEXT".to_string()],
            ch_codes: vec!["CH-SAAS".to_string()],
            rs_codes: vec!["RS-EXFIL".to_string()],
            ev_codes: vec!["EV-PROXY".to_string()],
            ob_codes: vec![],
        }
    }

    #[test]
    fn valid_assignment_passes() {
        assert!(adapter().validate_assignment(&valid_assignment()).is_empty());
    }

    #[test]
    fn missing_required_dimension_fails() {
        let mut assignment = valid_assignment();
        assignment.fs_code = String::new();
        let errors = adapter().validate_assignment(&assignment);
        assert!(errors.iter().any(|e| e.starts_with("FS:")));

        let mut assignment = valid_assignment();
        assignment.uc_codes.clear();
        let errors = adapter().validate_assignment(&assignment);
        assert!(errors.iter().any(|e| e.starts_with("UC:")));
    }

    #[test]
    fn unknown_code_fails() {
        let mut assignment = valid_assignment();
        assignment.dt_codes = vec!["DT-NOPE".to_string()];
        let errors = adapter().validate_assignment(&assignment);
        assert!(errors.iter().any(|e| e.contains("unknown code")));
    }

    #[test]
    fn code_from_wrong_dimension_fails() {
        let mut assignment = valid_assignment();
        assignment.dt_codes = vec!["CH-SAAS".to_string()];
        let errors = adapter().validate_assignment(&assignment);
        assert!(errors.iter().any(|e| e.contains("another dimension")));
    }

    #[test]
    fn empty_outcome_dimension_is_allowed() {
        let assignment = valid_assignment();
        assert!(assignment.ob_codes.is_empty());
        assert!(adapter().validate_assignment(&assignment).is_empty());
    }

    #[test]
    fn fallbacks_complete_missing_dimensions() {
        let mut assignment = TaxonomyAssignment::default();
        adapter().complete_with_fallbacks(&mut assignment).unwrap();
        assert_eq!(assignment.fs_code, "FS-GEN");
        assert_eq!(assignment.uc_codes, vec!["UC-UNK"]);
        assert!(adapter().validate_assignment(&assignment).is_empty());
    }

    #[test]
    fn legacy_columns_lift_into_singleton_arrays() {
        let legacy = LegacyTaxonomy {
            fs_uc_code: Some("UC-CHAT".to_string()),
            dt_code: Some("DT-TEXT".to_string()),
            ..Default::default()
        };
        let (assignment, needs_review) = adapter().lift_legacy(&legacy);
        assert!(needs_review);
        assert_eq!(assignment.uc_codes, vec!["UC-CHAT"]);
        assert_eq!(assignment.dt_codes, vec!["DT-TEXT"]);

        let (_, needs_review) = adapter().lift_legacy(&LegacyTaxonomy::default());
        assert!(!needs_review);
    }
}
