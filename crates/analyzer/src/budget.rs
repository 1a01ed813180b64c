use chrono::{NaiveDate, Utc};
use std::sync::Mutex;

/// Daily USD token bucket with candidate-priority enforcement.
///
/// A and B candidates are always analyzed; C candidates draw from the
/// bucket and are the first dropped when it runs dry. One acquire per
/// batch, so the mutex sees no real contention.
pub struct BudgetBucket {
    inner: Mutex<BucketState>,
    daily_limit_usd: f64,
    /// Cost estimates are inflated by this factor before the check.
    estimation_buffer: f64,
}

struct BucketState {
    spent_usd: f64,
    day: NaiveDate,
}

impl BudgetBucket {
    pub fn new(daily_limit_usd: f64) -> Self {
        Self {
            inner: Mutex::new(BucketState {
                spent_usd: 0.0,
                day: Utc::now().date_naive(),
            }),
            daily_limit_usd,
            estimation_buffer: 1.2,
        }
    }

    fn roll_day(state: &mut BucketState) {
        let today = Utc::now().date_naive();
        if today > state.day {
            state.spent_usd = 0.0;
            state.day = today;
        }
    }

    pub fn remaining_usd(&self) -> f64 {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::roll_day(&mut state);
        (self.daily_limit_usd - state.spent_usd).max(0.0)
    }

    /// Whether a batch with the given estimated cost may be dispatched.
    /// `has_priority` marks batches containing A or B candidates, which are
    /// never budget-dropped.
    pub fn admit(&self, estimated_cost_usd: f64, has_priority: bool) -> bool {
        if has_priority {
            return true;
        }
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::roll_day(&mut state);
        state.spent_usd + estimated_cost_usd * self.estimation_buffer <= self.daily_limit_usd
    }

    pub fn charge(&self, actual_cost_usd: f64) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::roll_day(&mut state);
        state.spent_usd += actual_cost_usd;
    }

    pub fn spent_usd(&self) -> f64 {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::roll_day(&mut state);
        state.spent_usd
    }
}
