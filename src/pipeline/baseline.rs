//! Robust per-ticker baseline derived from the window store

use super::config::{BaselinePolicy, WindowDurations};
use super::types::{BaselineSnapshot, SizeStats};
use super::windows::{WindowSize, WindowStore};

pub struct BaselineEstimator {
    policy: BaselinePolicy,
    durations: WindowDurations,
}

impl BaselineEstimator {
    pub fn new(policy: BaselinePolicy, durations: WindowDurations) -> Self {
        Self { policy, durations }
    }

    /// Build the snapshot for `ticker` from its current windows
    ///
    /// Size statistics come from the 24h window and are withheld (low
    /// confidence) below `min_samples`. The hourly rate is the 60m count over
    /// the hourly duration; the baseline rate is the 24h count over the span the
    /// 24h window actually covers, clamped to [hourly, daily].
    pub fn estimate(&self, store: &mut WindowStore, ticker: &str) -> BaselineSnapshot {
        let mut counts = [0usize; 4];
        for (i, window) in WindowSize::all().iter().enumerate() {
            counts[i] = store.snapshot(ticker, *window).map_or(0, |w| w.len());
        }
        let [trades_1m, trades_5m, trades_60m, trades_24h] = counts;

        let hourly_minutes = self.durations.hourly_secs as f64 / 60.0;
        let daily_minutes = self.durations.daily_secs as f64 / 60.0;

        let (size_stats, covered_minutes) = match store.snapshot(ticker, WindowSize::Hour24) {
            Some(day) => {
                let stats = if day.len() >= self.policy.min_samples {
                    match (day.median_size(), day.mad_size()) {
                        (Some(median), Some(mad)) => Some(SizeStats {
                            median,
                            mad,
                            mad_scaled: mad * self.policy.mad_consistency,
                        }),
                        _ => None,
                    }
                } else {
                    None
                };
                let span = match (day.oldest(), day.newest()) {
                    (Some(oldest), Some(newest)) => (newest - oldest).num_seconds() as f64 / 60.0,
                    _ => 0.0,
                };
                (stats, span)
            }
            None => (None, 0.0),
        };

        let covered_minutes = covered_minutes.clamp(hourly_minutes, daily_minutes);

        BaselineSnapshot {
            ticker: ticker.to_string(),
            size_stats,
            rate_60m: trades_60m as f64 / hourly_minutes,
            rate_60m_baseline: trades_24h as f64 / covered_minutes,
            trades_1m,
            trades_5m,
            trades_60m,
            trades_24h,
        }
    }
}
