//! Cross-ticker cluster detection
//!
//! Keeps every recent score at or above the cluster floor inside a lookback
//! window and fires when enough distinct tickers are represented. Membership is
//! purely temporal: any tickers spiking together count, related or not.

use super::config::ClusterPolicy;
use super::types::{ClusterSignal, ScoreResult};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, VecDeque};

#[derive(Debug, Clone)]
struct ClusterEntry {
    ticker: String,
    score: f64,
    at: DateTime<Utc>,
}

pub struct ClusterDetector {
    policy: ClusterPolicy,
    entries: VecDeque<ClusterEntry>,
    /// Eviction clock, never rewinds
    latest: Option<DateTime<Utc>>,
}

impl ClusterDetector {
    pub fn new(policy: ClusterPolicy) -> Self {
        Self {
            policy,
            entries: VecDeque::new(),
            latest: None,
        }
    }

    /// Register a score. Returns true if it cleared the floor and was kept.
    pub fn observe(&mut self, result: &ScoreResult) -> bool {
        if !result.score.is_finite() || result.score < self.policy.floor {
            return false;
        }

        let latest = self.advance(result.at);
        if result.at <= latest - self.lookback() {
            return false;
        }

        let pos = self.entries.partition_point(|e| e.at <= result.at);
        self.entries.insert(
            pos,
            ClusterEntry {
                ticker: result.ticker.clone(),
                score: result.score,
                at: result.at,
            },
        );
        self.evict(latest);
        true
    }

    /// Current cluster state, if at least `min_tickers` distinct tickers are in the lookback
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Option<ClusterSignal> {
        let latest = self.advance(now);
        self.evict(latest);

        let tickers: BTreeSet<String> = self.entries.iter().map(|e| e.ticker.clone()).collect();
        if tickers.len() < self.policy.min_tickers {
            return None;
        }

        let max_score = self
            .entries
            .iter()
            .map(|e| e.score)
            .fold(f64::MIN, f64::max);

        Some(ClusterSignal {
            tickers,
            max_score,
            entries: self.entries.len(),
            at: latest,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookback(&self) -> Duration {
        Duration::seconds(self.policy.lookback_secs)
    }

    fn advance(&mut self, at: DateTime<Utc>) -> DateTime<Utc> {
        let latest = match self.latest {
            Some(seen) if seen >= at => seen,
            _ => at,
        };
        self.latest = Some(latest);
        latest
    }

    fn evict(&mut self, latest: DateTime<Utc>) {
        let cutoff = latest - self.lookback();
        while self.entries.front().is_some_and(|e| e.at <= cutoff) {
            self.entries.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ScoreComponents;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn scored(ticker: &str, score: f64, offset_secs: i64) -> ScoreResult {
        ScoreResult {
            ticker: ticker.to_string(),
            trade_id: format!("{}-{}", ticker, offset_secs),
            score,
            components: ScoreComponents {
                size_shock: score,
                burst: 0.0,
                whale: 0.0,
                size_z: Some(8.0),
                burst_ratio: 1.0,
                notional: 10.0,
            },
            at: Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).unwrap(),
        }
    }

    fn detector() -> ClusterDetector {
        ClusterDetector::new(ClusterPolicy::default())
    }

    #[test]
    fn test_below_floor_is_ignored() {
        let mut d = detector();
        assert!(!d.observe(&scored("A", 69.9, 0)));
        assert!(d.is_empty());
    }

    #[test]
    fn test_single_ticker_never_clusters() {
        let mut d = detector();
        for i in 0..5 {
            let r = scored("A", 95.0, i);
            assert!(d.observe(&r));
            assert!(d.evaluate(r.at).is_none());
        }
        assert_eq!(d.len(), 5);
    }

    #[test]
    fn test_two_tickers_fire_with_max_score() {
        let mut d = detector();
        d.observe(&scored("A", 75.0, 0));
        d.observe(&scored("A", 92.0, 10));
        let r = scored("B", 80.0, 20);
        d.observe(&r);

        let signal = d.evaluate(r.at).unwrap();
        assert_eq!(signal.ticker_count(), 2);
        assert_eq!(signal.entries, 3);
        assert_eq!(signal.max_score, 92.0);
        assert!(signal.tickers.contains("A") && signal.tickers.contains("B"));
    }

    #[test]
    fn test_entries_expire_after_lookback() {
        let mut d = detector();
        d.observe(&scored("A", 90.0, 0));
        // exactly lookback later: A is out of (T-300, T]
        let r = scored("B", 90.0, 300);
        d.observe(&r);

        assert!(d.evaluate(r.at).is_none());
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_clock_does_not_rewind() {
        let mut d = detector();
        d.observe(&scored("A", 90.0, 1_000));
        // late arrival already outside the lookback
        assert!(!d.observe(&scored("B", 90.0, 600)));
        // late arrival inside the lookback is kept
        assert!(d.observe(&scored("C", 90.0, 900)));

        let signal = d.evaluate(Utc.timestamp_opt(1_700_000_000, 0).unwrap()).unwrap();
        assert_eq!(signal.ticker_count(), 2);
    }

    proptest! {
        #[test]
        fn prop_signal_respects_min_tickers(
            events in prop::collection::vec((0usize..4, 0.0f64..100.0, 0i64..120), 1..60),
            min_tickers in 1usize..4,
        ) {
            let mut d = ClusterDetector::new(ClusterPolicy {
                min_tickers,
                ..ClusterPolicy::default()
            });
            let mut offset = 0;
            for (ticker, score, gap) in events {
                offset += gap;
                let r = scored(&format!("T{}", ticker), score, offset);
                if d.observe(&r) {
                    if let Some(signal) = d.evaluate(r.at) {
                        prop_assert!(signal.ticker_count() >= min_tickers);
                        prop_assert!(signal.max_score >= 70.0);
                    }
                }
            }
        }
    }
}
