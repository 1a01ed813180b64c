use serde::Serialize;
use shadowscan_model::SignatureStats;

/// One signature as presented to the external classifier.
///
/// This struct is the no-PII-egress boundary: only the signature, the
/// normalized host, the path template, and aggregate statistics exist here.
/// There are no fields for user identifiers, source addresses, device
/// identifiers, or raw URLs, so they cannot leak by construction.
#[derive(Debug, Clone, Serialize)]
pub struct PayloadItem {
    pub signature: String,
    pub norm_host: String,
    pub norm_path_template: String,
    pub access_count: u64,
    pub unique_users: u64,
    pub bytes_sent_sum: u64,
    pub bytes_sent_p95: u64,
    pub method_hint: String,
    pub candidate_flags: Option<String>,
}

impl PayloadItem {
    pub fn from_stats(stats: &SignatureStats) -> Self {
        Self {
            signature: stats.url_signature.clone(),
            norm_host: stats.norm_host.clone(),
            norm_path_template: stats.norm_path_template.clone(),
            access_count: stats.access_count,
            unique_users: stats.unique_users,
            bytes_sent_sum: stats.bytes_sent_sum,
            bytes_sent_p95: stats.bytes_sent_p95,
            method_hint: stats.bytes_sent_bucket.clone(),
            candidate_flags: stats.flags.render(),
        }
    }

    /// Whether this item belongs to a batch that must never be budget-dropped.
    pub fn has_priority(&self) -> bool {
        self.candidate_flags
            .as_deref()
            .map(|flags| flags.split('|').any(|f| f == "A" || f == "B"))
            .unwrap_or(false)
    }

    fn rendered_len(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

/// A dispatchable batch: 10–20 items, bounded by a character budget.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPayload {
    pub items: Vec<PayloadItem>,
}

impl BatchPayload {
    pub const MIN_ITEMS: usize = 10;
    pub const MAX_ITEMS: usize = 20;

    /// Greedily cut `items` into batches of at most [`Self::MAX_ITEMS`]
    /// items or `max_chars` rendered characters, whichever is smaller.
    pub fn chunk(items: Vec<PayloadItem>, max_chars: usize) -> Vec<BatchPayload> {
        let mut batches = Vec::new();
        let mut current: Vec<PayloadItem> = Vec::new();
        let mut current_chars = 0usize;
        for item in items {
            let item_chars = item.rendered_len();
            let over_chars = !current.is_empty() && current_chars + item_chars > max_chars;
            if current.len() >= Self::MAX_ITEMS || over_chars {
                batches.push(BatchPayload {
                    items: std::mem::take(&mut current),
                });
                current_chars = 0;
            }
            current_chars += item_chars;
            current.push(item);
        }
        if !current.is_empty() {
            batches.push(BatchPayload { items: current });
        }
        batches
    }

    pub fn has_priority(&self) -> bool {
        self.items.iter().any(PayloadItem::has_priority)
    }

    /// Drop C-only items from the tail until the batch fits the budget
    /// estimate; A/B items are kept unconditionally.
    pub fn shed_low_priority(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(PayloadItem::has_priority);
        before - self.items.len()
    }

    /// The prompt body: instructions plus the item list as JSON.
    pub fn render_prompt(&self, prompt_version: &str, error_context: Option<&str>) -> String {
        let items = serde_json::to_string_pretty(&self.items).unwrap_or_else(|_| "[]".to_string());
        let mut prompt = format!(
            "You classify web service request patterns (prompt v{prompt_version}).\n\
             For each signature below, identify the service, its usage type, risk level, \
             category, a confidence in [0,1], a one-line rationale, and the eight-dimension \
             taxonomy assignment.\n\
             Respond with a single JSON object: \
             {{\"classifications\": [{{\"signature\", \"service_name\", \"usage_type\", \
             \"risk_level\", \"category\", \"confidence\", \"rationale_short\", \
             \"taxonomy\": {{\"fs_code\", \"im_code\", \"uc_codes\", \"dt_codes\", \
             \"ch_codes\", \"rs_codes\", \"ev_codes\", \"ob_codes\"}}}}]}}.\n"
        );
        if let Some(context) = error_context {
            prompt.push_str(&format!(
                "Your previous answer was rejected: {context}. Return only valid JSON \
                 matching the schema.\n"
            ));
        }
        prompt.push_str("Signatures:\n");
        prompt.push_str(&items);
        prompt
    }

    pub fn estimated_chars(&self) -> usize {
        self.items.iter().map(PayloadItem::rendered_len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shadowscan_model::{CandidateFlags, SignatureStats};

    fn stats(signature: &str, flags: CandidateFlags) -> SignatureStats {
        let seen = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        SignatureStats {
            run_id: "r".to_string(),
            url_signature: signature.to_string(),
            norm_host: "api.example.com".to_string(),
            norm_path_template: "/v1/chat?p=1".to_string(),
            dest_domain: "example.com".to_string(),
            bytes_sent_bucket: "L".to_string(),
            access_count: 3,
            unique_users: 2,
            bytes_sent_sum: 300,
            bytes_sent_max: 200,
            bytes_sent_p95: 200,
            bytes_received_sum: 0,
            burst_max_5min: 0,
            cumulative_user_domain_day_max: 0,
            flags,
            sampled: false,
            first_seen: seen,
            last_seen: seen,
        }
    }

    #[test]
    fn payload_carries_no_identity_fields() {
        let item = PayloadItem::from_stats(&stats("sig", CandidateFlags::default()));
        let rendered = serde_json::to_string(&item).unwrap();
        for forbidden in ["user_id", "src_ip", "device_id", "dest_domain", "url\""] {
            assert!(
                !rendered.contains(forbidden),
                "payload must not contain {forbidden}: {rendered}"
            );
        }
    }

    #[test]
    fn chunking_respects_item_cap() {
        let items: Vec<_> = (0..45)
            .map(|i| PayloadItem::from_stats(&stats(&format!("s{i}"), CandidateFlags::default())))
            .collect();
        let batches = BatchPayload::chunk(items, usize::MAX);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.items.len() <= BatchPayload::MAX_ITEMS));
    }

    #[test]
    fn chunking_respects_char_budget() {
        let items: Vec<_> = (0..6)
            .map(|i| PayloadItem::from_stats(&stats(&format!("s{i}"), CandidateFlags::default())))
            .collect();
        let one_item = items[0].rendered_len();
        let batches = BatchPayload::chunk(items, one_item + 1);
        assert_eq!(batches.len(), 6);
    }

    #[test]
    fn shedding_keeps_priority_items() {
        let a = CandidateFlags {
            a: true,
            ..Default::default()
        };
        let c = CandidateFlags {
            c: true,
            sampled: true,
            ..Default::default()
        };
        let mut batch = BatchPayload {
            items: vec![
                PayloadItem::from_stats(&stats("keep", a)),
                PayloadItem::from_stats(&stats("drop", c)),
            ],
        };
        let shed = batch.shed_low_priority();
        assert_eq!(shed, 1);
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].signature, "keep");
    }

    #[test]
    fn error_context_is_included_on_retry() {
        let batch = BatchPayload {
            items: vec![PayloadItem::from_stats(&stats("s", CandidateFlags::default()))],
        };
        let prompt = batch.render_prompt("1", Some("missing field confidence"));
        assert!(prompt.contains("previous answer was rejected"));
        assert!(prompt.contains("missing field confidence"));
    }
}
