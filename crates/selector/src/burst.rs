//! Sliding-window burst detection.
//!
//! Windows are left-open, right-closed `(t - W, t]`, anchored at each write
//! event. Contiguous qualifying windows are merged for the audit narration.

use crate::audit::BurstWindow;
use chrono::{DateTime, Duration, Utc};

/// For the sorted write-event times of one (user, domain) pair, compute the
/// per-event window count, the maximum, and the merged qualifying windows.
pub(crate) fn analyze(
    times: &[DateTime<Utc>],
    window_secs: i64,
    min_count: usize,
) -> BurstAnalysis {
    let width = Duration::seconds(window_secs);
    let mut counts = vec![0usize; times.len()];
    let mut max_count = 0usize;
    let mut qualifying: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
    // Indices of events inside at least one qualifying window.
    let mut in_burst = vec![false; times.len()];

    let mut start = 0usize;
    for end in 0..times.len() {
        // Advance start so that times[start] > times[end] - width (left-open).
        while times[start] <= times[end] - width {
            start += 1;
        }
        let count = end - start + 1;
        counts[end] = count;
        max_count = max_count.max(count);
        if count >= min_count {
            qualifying.push((times[end] - width, times[end]));
            for flag in in_burst.iter_mut().take(end + 1).skip(start) {
                *flag = true;
            }
        }
    }

    BurstAnalysis {
        counts,
        max_count,
        in_burst,
        merged_windows: merge_windows(qualifying),
    }
}

pub(crate) struct BurstAnalysis {
    /// Window count anchored at each event.
    pub counts: Vec<usize>,
    pub max_count: usize,
    pub in_burst: Vec<bool>,
    pub merged_windows: Vec<BurstWindow>,
}

fn merge_windows(mut windows: Vec<(DateTime<Utc>, DateTime<Utc>)>) -> Vec<BurstWindow> {
    windows.sort();
    let mut merged: Vec<BurstWindow> = Vec::new();
    for (start, end) in windows {
        match merged.last_mut() {
            Some(last) if start <= last.end => {
                last.end = last.end.max(end);
            }
            _ => merged.push(BurstWindow { start, end }),
        }
    }
    merged
}
