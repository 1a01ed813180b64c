use crate::audit::{SelectionAudit, SelectionCounts};
use crate::burst;
use crate::config::SelectorConfig;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use shadowscan_model::{CandidateFlags, CanonicalEvent, SignatureStats, UrlSignature};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Candidate flags resolved for one event.
#[derive(Debug, Clone)]
pub struct EventFlag {
    pub lineage_hash: String,
    pub url_signature: String,
    pub flags: CandidateFlags,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub event_flags: Vec<EventFlag>,
    pub stats: Vec<SignatureStats>,
    pub audit: SelectionAudit,
}

/// Pure aggregation over the canonical event stream. The only state is the
/// run identifier, which seeds the coverage sample.
pub struct Selector {
    config: SelectorConfig,
    run_id: String,
}

impl Selector {
    pub fn new(config: SelectorConfig, run_id: &str) -> Self {
        Self {
            config,
            run_id: run_id.to_string(),
        }
    }

    /// `signatures` maps signature hex -> derived signature record, used to
    /// echo host/path/bucket into the statistics rows.
    pub fn select(
        &self,
        events: &[CanonicalEvent],
        signatures: &HashMap<String, UrlSignature>,
    ) -> Selection {
        // Deterministic processing order regardless of input permutation.
        let mut order: Vec<usize> = (0..events.len()).collect();
        order.sort_by(|&a, &b| {
            let ea = &events[a];
            let eb = &events[b];
            (ea.event_time, &ea.user_id, &ea.dest_domain, &ea.lineage_hash).cmp(&(
                eb.event_time,
                &eb.user_id,
                &eb.dest_domain,
                &eb.lineage_hash,
            ))
        });

        let action_ok = |event: &CanonicalEvent| -> bool {
            self.config
                .action_filter
                .map(|filter| event.action == filter)
                .unwrap_or(true)
        };
        let is_write = |event: &CanonicalEvent| -> bool {
            shadowscan_model::MethodGroup::from_method(event.http_method.as_deref()).is_write()
        };

        // Burst analysis per (user, domain) over write events.
        let mut write_groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
        for &idx in &order {
            let event = &events[idx];
            if action_ok(event) && is_write(event) {
                write_groups
                    .entry((event.user_id.clone(), event.dest_domain.clone()))
                    .or_default()
                    .push(idx);
            }
        }
        let mut burst_count_at = vec![0usize; events.len()];
        let mut in_burst = vec![false; events.len()];
        let mut burst_windows = Vec::new();
        for (key, indices) in &write_groups {
            let times: Vec<_> = indices.iter().map(|&i| events[i].event_time).collect();
            let analysis = burst::analyze(
                &times,
                self.config.burst_window_secs,
                self.config.burst_min_count,
            );
            for (pos, &idx) in indices.iter().enumerate() {
                burst_count_at[idx] = analysis.counts[pos];
                in_burst[idx] = analysis.in_burst[pos];
            }
            if !analysis.merged_windows.is_empty() {
                burst_windows.push((key.clone(), analysis.merged_windows));
            }
        }

        // Daily cumulative upload per (user, domain, UTC day).
        let mut cumulative: HashMap<(String, String, NaiveDate), u64> = HashMap::new();
        for &idx in &order {
            let event = &events[idx];
            if !action_ok(event) {
                continue;
            }
            let key = (
                event.user_id.clone(),
                event.dest_domain.clone(),
                event.event_time.date_naive(),
            );
            *cumulative.entry(key).or_insert(0) += event.bytes_sent;
        }

        // Per-event flags.
        let mut counts = SelectionCounts {
            total_events: events.len() as u64,
            ..Default::default()
        };
        let mut flags_by_event = vec![CandidateFlags::default(); events.len()];
        let sample_threshold = (self.config.c_sample_rate * 10_000.0) as u64;

        for &idx in &order {
            let event = &events[idx];
            let mut flags = CandidateFlags::default();
            let cumulative_bytes = cumulative
                .get(&(
                    event.user_id.clone(),
                    event.dest_domain.clone(),
                    event.event_time.date_naive(),
                ))
                .copied()
                .unwrap_or(0);
            let cumulative_hit = cumulative_bytes >= self.config.cumulative_min_bytes;

            if action_ok(event) {
                if event.bytes_sent >= self.config.a_min_bytes {
                    flags.a = true;
                }
                if in_burst[idx] {
                    flags.burst = true;
                }
                if cumulative_hit {
                    flags.cumulative = true;
                }
                if is_write(event) {
                    let high_risk = event
                        .app_category
                        .as_deref()
                        .map(|c| self.config.high_risk_categories.iter().any(|h| h == c))
                        .unwrap_or(false);
                    if high_risk || in_burst[idx] || cumulative_hit {
                        flags.b = true;
                    }
                }
            }

            // C: coverage sample over the small, unflagged remainder.
            if !flags.a && !flags.b && event.bytes_sent < self.config.a_min_bytes {
                counts.c_eligible += 1;
                if sample_threshold > 0 && self.sample_draw(&event.lineage_hash) < sample_threshold
                {
                    flags.c = true;
                    flags.sampled = true;
                } else {
                    counts.c_excluded += 1;
                }
            }

            if flags.a {
                counts.a_count += 1;
            }
            if flags.b {
                counts.b_count += 1;
            }
            if flags.c {
                counts.c_count += 1;
            }
            flags_by_event[idx] = flags;
        }

        let mut exclusions = Vec::new();
        if self.config.c_sample_rate == 0.0 && counts.c_eligible > 0 {
            exclusions.push(format!(
                "coverage sample: 0 of {} (sampling disabled)",
                counts.c_eligible
            ));
        }

        // Signature statistics: union of event flags plus aggregates.
        let stats = self.build_stats(
            events,
            &order,
            &flags_by_event,
            &burst_count_at,
            &cumulative,
            signatures,
        );

        let event_flags = order
            .iter()
            .map(|&idx| EventFlag {
                lineage_hash: events[idx].lineage_hash.clone(),
                url_signature: events[idx].url_signature.clone(),
                flags: flags_by_event[idx],
            })
            .collect();

        Selection {
            event_flags,
            stats,
            audit: SelectionAudit {
                a_min_bytes: self.config.a_min_bytes,
                burst_window_secs: self.config.burst_window_secs,
                burst_min_count: self.config.burst_min_count,
                cumulative_min_bytes: self.config.cumulative_min_bytes,
                high_risk_categories: self.config.high_risk_categories.clone(),
                sample_rate: self.config.c_sample_rate,
                sample_method: "deterministic_hash".to_string(),
                sample_seed: self.run_id.clone(),
                counts,
                exclusions,
                burst_windows,
            },
        }
    }

    /// Deterministic draw in [0, 10000): first eight bytes (big-endian) of
    /// sha256(run_id | lineage_hash).
    fn sample_draw(&self, lineage_hash: &str) -> u64 {
        let digest = Sha256::digest(format!("{}|{lineage_hash}", self.run_id).as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix) % 10_000
    }

    #[allow(clippy::too_many_arguments)]
    fn build_stats(
        &self,
        events: &[CanonicalEvent],
        order: &[usize],
        flags_by_event: &[CandidateFlags],
        burst_count_at: &[usize],
        cumulative: &HashMap<(String, String, NaiveDate), u64>,
        signatures: &HashMap<String, UrlSignature>,
    ) -> Vec<SignatureStats> {
        let mut grouped: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for &idx in order {
            let signature = events[idx].url_signature.as_str();
            if signature.is_empty() {
                continue;
            }
            grouped.entry(signature).or_default().push(idx);
        }

        let mut stats = Vec::with_capacity(grouped.len());
        for (signature, indices) in grouped {
            let mut flags = CandidateFlags::default();
            let mut users: HashSet<&str> = HashSet::new();
            let mut bytes: Vec<u64> = Vec::with_capacity(indices.len());
            let mut bytes_received_sum = 0u64;
            let mut burst_max = 0u64;
            let mut cumulative_max = 0u64;
            let mut first_seen = events[indices[0]].event_time;
            let mut last_seen = first_seen;

            for &idx in &indices {
                let event = &events[idx];
                flags.merge(&flags_by_event[idx]);
                users.insert(event.user_id.as_str());
                bytes.push(event.bytes_sent);
                bytes_received_sum += event.bytes_received;
                burst_max = burst_max.max(burst_count_at[idx] as u64);
                let day_total = cumulative
                    .get(&(
                        event.user_id.clone(),
                        event.dest_domain.clone(),
                        event.event_time.date_naive(),
                    ))
                    .copied()
                    .unwrap_or(0);
                cumulative_max = cumulative_max.max(day_total);
                first_seen = first_seen.min(event.event_time);
                last_seen = last_seen.max(event.event_time);
            }

            bytes.sort_unstable();
            let bytes_sent_sum: u64 = bytes.iter().sum();
            let bytes_sent_max = *bytes.last().unwrap_or(&0);
            let bytes_sent_p95 = percentile_95(&bytes);

            let meta = signatures.get(signature);
            let representative = &events[indices[0]];
            stats.push(SignatureStats {
                run_id: self.run_id.clone(),
                url_signature: signature.to_string(),
                norm_host: meta
                    .map(|m| m.norm_host.clone())
                    .unwrap_or_else(|| representative.dest_host.clone()),
                norm_path_template: meta
                    .map(|m| m.norm_path_template.clone())
                    .unwrap_or_else(|| representative.norm_path.clone()),
                dest_domain: representative.dest_domain.clone(),
                bytes_sent_bucket: meta
                    .map(|m| m.bytes_bucket.as_str().to_string())
                    .unwrap_or_default(),
                access_count: indices.len() as u64,
                unique_users: users.len() as u64,
                bytes_sent_sum,
                bytes_sent_max,
                bytes_sent_p95,
                bytes_received_sum,
                burst_max_5min: burst_max,
                cumulative_user_domain_day_max: cumulative_max,
                sampled: flags.sampled,
                flags,
                first_seen,
                last_seen,
            });
        }
        stats
    }
}

/// Nearest-rank 95th percentile over a sorted slice.
fn percentile_95(sorted: &[u64]) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shadowscan_model::ActionTag;

    fn event(
        secs: i64,
        user: &str,
        domain: &str,
        method: &str,
        bytes_sent: u64,
        category: Option<&str>,
        signature: &str,
        lineage: &str,
    ) -> CanonicalEvent {
        CanonicalEvent {
            event_time: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
                + chrono::Duration::seconds(secs),
            vendor: "test".to_string(),
            user_id: user.to_string(),
            src_ip: "10.0.0.1".to_string(),
            dest_host: format!("www.{domain}"),
            dest_domain: domain.to_string(),
            url: format!("https://www.{domain}/x"),
            norm_path: "/x".to_string(),
            norm_query: String::new(),
            http_method: Some(method.to_string()),
            action: ActionTag::Allow,
            bytes_sent,
            bytes_received: 0,
            app_category: category.map(|c| c.to_string()),
            lineage_hash: lineage.to_string(),
            url_signature: signature.to_string(),
        }
    }

    fn select(events: &[CanonicalEvent], config: SelectorConfig, run_id: &str) -> Selection {
        Selector::new(config, run_id).select(events, &HashMap::new())
    }

    #[test]
    fn a_flag_on_large_transfer() {
        let events = vec![
            event(0, "u1", "d1.com", "GET", 2 * 1024 * 1024, None, "sig_a", "e1"),
            event(1, "u1", "d1.com", "GET", 100, None, "sig_b", "e2"),
        ];
        let selection = select(&events, SelectorConfig::default(), "run_1");
        let by_sig: HashMap<_, _> = selection
            .stats
            .iter()
            .map(|s| (s.url_signature.as_str(), s))
            .collect();
        assert!(by_sig["sig_a"].flags.a);
        assert!(!by_sig["sig_b"].flags.a);
        assert_eq!(selection.audit.counts.a_count, 1);
    }

    #[test]
    fn burst_of_writes_flags_b_with_max_count() {
        // Twenty-five POSTs at ten-second intervals for one (user, domain).
        let events: Vec<_> = (0..25)
            .map(|i| {
                event(
                    i * 10,
                    "u1",
                    "d1.com",
                    "POST",
                    100,
                    None,
                    "sig_burst",
                    &format!("e{i}"),
                )
            })
            .collect();
        let selection = select(&events, SelectorConfig::default(), "run_1");
        let stat = &selection.stats[0];
        assert!(stat.flags.b);
        assert!(stat.flags.burst);
        assert_eq!(stat.burst_max_5min, 25);
        assert_eq!(selection.audit.burst_windows.len(), 1);
    }

    #[test]
    fn high_risk_category_write_flags_b() {
        let events = vec![event(0, "u1", "ai.com", "POST", 10, Some("GenAI"), "s1", "e1")];
        let selection = select(&events, SelectorConfig::default(), "run_1");
        assert!(selection.stats[0].flags.b);
        assert!(!selection.stats[0].flags.burst);
    }

    #[test]
    fn daily_cumulative_flags_b() {
        // Three writes of 8 MiB each on one UTC day: 24 MiB >= 20 MiB.
        let events: Vec<_> = (0..3)
            .map(|i| {
                event(
                    i * 3600,
                    "u1",
                    "d1.com",
                    "PUT",
                    8 * 1024 * 1024,
                    None,
                    "s1",
                    &format!("e{i}"),
                )
            })
            .collect();
        let selection = select(&events, SelectorConfig::default(), "run_1");
        let stat = &selection.stats[0];
        assert!(stat.flags.b);
        assert!(stat.flags.cumulative);
        assert_eq!(stat.cumulative_user_domain_day_max, 24 * 1024 * 1024);
    }

    #[test]
    fn read_only_traffic_never_flags_b() {
        let events: Vec<_> = (0..30)
            .map(|i| event(i * 5, "u1", "d1.com", "GET", 100, Some("GenAI"), "s1", &format!("e{i}")))
            .collect();
        let selection = select(&events, SelectorConfig::default(), "run_1");
        assert!(!selection.stats[0].flags.b);
    }

    #[test]
    fn coverage_sample_is_reproducible() {
        let events: Vec<_> = (0..1000)
            .map(|i| event(i, "u1", "d1.com", "GET", 500, None, &format!("s{i}"), &format!("e{i}")))
            .collect();
        let first = select(&events, SelectorConfig::default(), "run_123");
        let second = select(&events, SelectorConfig::default(), "run_123");
        let sampled =
            |sel: &Selection| -> Vec<String> {
                sel.event_flags
                    .iter()
                    .filter(|f| f.flags.c)
                    .map(|f| f.lineage_hash.clone())
                    .collect()
            };
        assert_eq!(sampled(&first), sampled(&second));
        assert!(first.audit.counts.c_count > 0);

        // A different run id draws a different set.
        let other = select(&events, SelectorConfig::default(), "run_456");
        assert_ne!(sampled(&first), sampled(&other));
    }

    #[test]
    fn selection_is_order_independent() {
        let mut events: Vec<_> = (0..200)
            .map(|i| {
                event(
                    (i * 7) % 50,
                    if i % 2 == 0 { "u1" } else { "u2" },
                    "d1.com",
                    if i % 3 == 0 { "POST" } else { "GET" },
                    (i as u64) * 9000,
                    None,
                    &format!("s{}", i % 10),
                    &format!("e{i}"),
                )
            })
            .collect();
        let forward = select(&events, SelectorConfig::default(), "run_1");
        events.reverse();
        let reversed = select(&events, SelectorConfig::default(), "run_1");

        let pairs = |sel: &Selection| -> Vec<(String, Option<String>)> {
            sel.stats
                .iter()
                .map(|s| (s.url_signature.clone(), s.flags.render()))
                .collect()
        };
        assert_eq!(pairs(&forward), pairs(&reversed));
    }

    #[test]
    fn zero_sample_rate_records_exclusions() {
        let events: Vec<_> = (0..10)
            .map(|i| event(i, "u1", "d1.com", "GET", 100, None, "s1", &format!("e{i}")))
            .collect();
        let config = SelectorConfig {
            c_sample_rate: 0.0,
            ..Default::default()
        };
        let selection = select(&events, config, "run_1");
        assert_eq!(selection.audit.counts.c_count, 0);
        assert_eq!(selection.audit.counts.c_eligible, 10);
        assert_eq!(selection.audit.counts.c_excluded, 10);
        assert_eq!(selection.audit.exclusions.len(), 1);
        assert!(selection.audit.exclusions[0].contains("sampling disabled"));
    }

    #[test]
    fn eligible_events_are_sampled_or_accounted() {
        let events: Vec<_> = (0..500)
            .map(|i| event(i, "u1", "d1.com", "GET", 100, None, "s1", &format!("e{i}")))
            .collect();
        let selection = select(&events, SelectorConfig::default(), "run_9");
        let counts = &selection.audit.counts;
        assert_eq!(counts.c_eligible, counts.c_count + counts.c_excluded);
    }

    #[test]
    fn p95_uses_nearest_rank() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile_95(&sorted), 95);
        assert_eq!(percentile_95(&[7]), 7);
        assert_eq!(percentile_95(&[]), 0);
    }
}
