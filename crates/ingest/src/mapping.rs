use crate::{IngestError, Result};
use serde::{Deserialize, Serialize};
use shadowscan_model::ActionTag;
use std::collections::BTreeMap;
use std::path::Path;

/// Declarative per-vendor field mapping. For each canonical field, an
/// ordered list of candidate source column names; the first one present in
/// the header wins. Consumed read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorMapping {
    pub vendor: String,
    /// canonical field name -> candidate source columns, in preference order.
    pub fields: BTreeMap<String, Vec<String>>,
    /// vendor action value (lowercased) -> canonical action tag.
    #[serde(default)]
    pub action_values: BTreeMap<String, ActionTag>,
    /// Action applied when the vendor value is absent or unmapped.
    #[serde(default = "default_action")]
    pub default_action: ActionTag,
}

fn default_action() -> ActionTag {
    ActionTag::Observe
}

/// Canonical fields a mapping may bind. `event_time`, `user_id` and `url`
/// are required; the rest degrade to defaults when unbound.
pub(crate) const REQUIRED_FIELDS: [&str; 3] = ["event_time", "user_id", "url"];
pub(crate) const OPTIONAL_FIELDS: [&str; 6] = [
    "src_ip",
    "http_method",
    "action",
    "bytes_sent",
    "bytes_received",
    "app_category",
];

impl VendorMapping {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let mapping: VendorMapping = serde_json::from_slice(&bytes)?;
        mapping.validate()?;
        Ok(mapping)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vendor.trim().is_empty() {
            return Err(IngestError::InvalidMapping("vendor tag is empty".into()));
        }
        for field in REQUIRED_FIELDS {
            match self.fields.get(field) {
                Some(candidates) if !candidates.is_empty() => {}
                _ => {
                    return Err(IngestError::InvalidMapping(format!(
                        "required field {field:?} has no candidate columns"
                    )))
                }
            }
        }
        for (field, candidates) in &self.fields {
            let known = REQUIRED_FIELDS.contains(&field.as_str())
                || OPTIONAL_FIELDS.contains(&field.as_str());
            if !known {
                return Err(IngestError::InvalidMapping(format!(
                    "unknown canonical field {field:?}"
                )));
            }
            if candidates.is_empty() {
                return Err(IngestError::InvalidMapping(format!(
                    "field {field:?} has an empty candidate list"
                )));
            }
        }
        Ok(())
    }

    pub fn translate_action(&self, raw: Option<&str>) -> ActionTag {
        let Some(raw) = raw else {
            return self.default_action;
        };
        self.action_values
            .get(raw.trim().to_lowercase().as_str())
            .copied()
            .unwrap_or(self.default_action)
    }
}
