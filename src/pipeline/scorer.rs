//! Unusual-score computation
//!
//! ```text
//! size_z   = (size - median_24h) / max(mad_scaled, SCALE_FLOOR)
//! S        = clamp(size_z, 0, SIZE_SHOCK_CAP) / SIZE_SHOCK_CAP * 100      (0 on low confidence)
//! ratio    = rate_60m / max(rate_60m_baseline, RATE_FLOOR)
//! B        = clamp((ratio - 1) / (BURST_CAP - 1), 0, 1) * 100
//! W        = 0 below WHALE_FLOOR, else 50 + 50 * clamp((notional - FLOOR) / (FULL - FLOOR), 0, 1)
//! score    = clamp(max(weighted) + CORROBORATION * (sum(weighted) - max(weighted)), 0, 100)
//! ```
//!
//! Weighted max plus partial corroboration: one strong signal is enough to
//! alert, and agreeing signals push the score higher without letting two weak
//! ones add up to a strong one.

use super::config::ScoringPolicy;
use super::types::{BaselineSnapshot, ScoreComponents, ScoreResult, TradeEvent};

pub struct ScoringEngine {
    policy: ScoringPolicy,
}

impl ScoringEngine {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Score a trade against its baseline. Pure: no clock, no state.
    pub fn score(&self, trade: &TradeEvent, baseline: &BaselineSnapshot) -> ScoreResult {
        let p = &self.policy;

        let size_z = baseline.size_stats.map(|stats| {
            (trade.size as f64 - stats.median) / stats.mad_scaled.max(p.scale_floor)
        });
        let size_shock = size_z.map_or(0.0, |z| {
            z.clamp(0.0, p.size_shock_cap) / p.size_shock_cap * 100.0
        });

        let burst_ratio = baseline.rate_60m / baseline.rate_60m_baseline.max(p.rate_floor);
        let burst = ((burst_ratio - 1.0) / (p.burst_cap - 1.0)).clamp(0.0, 1.0) * 100.0;

        let notional = trade.notional();
        let whale = if notional < p.whale_floor_notional {
            0.0
        } else {
            let span = p.whale_full_notional - p.whale_floor_notional;
            50.0 + 50.0 * ((notional - p.whale_floor_notional) / span).clamp(0.0, 1.0)
        };

        let weighted = [
            p.weights.size_shock * size_shock,
            p.weights.burst * burst,
            p.weights.whale * whale,
        ];
        let lead = weighted.iter().copied().fold(0.0_f64, f64::max);
        let total: f64 = weighted.iter().sum();
        let score = (lead + p.corroboration * (total - lead)).clamp(0.0, 100.0);

        ScoreResult {
            ticker: trade.ticker.clone(),
            trade_id: trade.trade_id.clone(),
            score,
            components: ScoreComponents {
                size_shock,
                burst,
                whale,
                size_z,
                burst_ratio,
                notional,
            },
            at: trade.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Side, SizeStats};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    fn make_trade(size: u64, price_cents: i64) -> TradeEvent {
        TradeEvent {
            ticker: "X".to_string(),
            trade_id: "t".to_string(),
            price: Decimal::new(price_cents, 2),
            size,
            side: Side::Yes,
            occurred_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn baseline(median: f64, mad_scaled: f64, rate: f64, rate_baseline: f64) -> BaselineSnapshot {
        BaselineSnapshot {
            ticker: "X".to_string(),
            size_stats: Some(SizeStats {
                median,
                mad: mad_scaled / 1.4826,
                mad_scaled,
            }),
            rate_60m: rate,
            rate_60m_baseline: rate_baseline,
            trades_1m: 1,
            trades_5m: 1,
            trades_60m: 10,
            trades_24h: 100,
        }
    }

    fn engine() -> ScoringEngine {
        ScoringEngine::new(ScoringPolicy::default())
    }

    #[test]
    fn test_size_shock_scenario_clears_solo_threshold() {
        // median 10, scaled MAD 3, size 100 at the baseline rate
        let result = engine().score(&make_trade(100, 50), &baseline(10.0, 3.0, 1.0, 1.0));

        assert_eq!(result.components.size_z, Some(30.0));
        assert_eq!(result.components.size_shock, 100.0);
        assert_eq!(result.components.burst, 0.0);
        assert_eq!(result.components.whale, 0.0);
        assert_eq!(result.score, 100.0);
        assert!(result.score >= 85.0);
    }

    #[test]
    fn test_regression_fixed_formula() {
        // z = (40 - 10) / 5 = 6 → S = 75; ratio 4 → B = 33.33; notional 40*0.5 → W = 0
        let result = engine().score(&make_trade(40, 50), &baseline(10.0, 5.0, 4.0, 1.0));

        assert!((result.components.size_shock - 75.0).abs() < 1e-9);
        assert!((result.components.burst - 100.0 / 3.0).abs() < 1e-9);
        let expected = 75.0 + 0.25 * (0.8 * 100.0 / 3.0);
        assert!((result.score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_zero_mad_uses_scale_floor() {
        let result = engine().score(&make_trade(5_000, 50), &baseline(500.0, 0.0, 1.0, 1.0));

        assert_eq!(result.components.size_z, Some(4_500.0));
        assert_eq!(result.components.size_shock, 100.0);
        assert!(result.is_finite());
    }

    #[test]
    fn test_low_confidence_suppresses_only_size_shock() {
        let mut snapshot = baseline(10.0, 3.0, 10.0, 1.0);
        snapshot.size_stats = None;

        let result = engine().score(&make_trade(5_000, 50), &snapshot);

        assert_eq!(result.components.size_z, None);
        assert_eq!(result.components.size_shock, 0.0);
        assert_eq!(result.components.burst, 100.0);
        // 5000 contracts × $0.50 = $2500 → full whale
        assert_eq!(result.components.whale, 100.0);
    }

    #[test]
    fn test_zero_baseline_rate_is_guarded() {
        let result = engine().score(&make_trade(1, 50), &baseline(10.0, 3.0, 0.0, 0.0));

        assert_eq!(result.components.burst_ratio, 0.0);
        assert_eq!(result.components.burst, 0.0);
        assert!(result.is_finite());
    }

    #[test]
    fn test_whale_band() {
        let s = engine();
        let flat = baseline(1_000.0, 1_000.0, 1.0, 1.0);

        // $999
        assert_eq!(s.score(&make_trade(999, 100), &flat).components.whale, 0.0);
        // $1000
        assert_eq!(s.score(&make_trade(1_000, 100), &flat).components.whale, 50.0);
        // $1750
        assert_eq!(s.score(&make_trade(1_750, 100), &flat).components.whale, 75.0);
        // $10000
        assert_eq!(s.score(&make_trade(10_000, 100), &flat).components.whale, 100.0);
    }

    #[test]
    fn test_score_is_deterministic() {
        let trade = make_trade(77, 33);
        let snapshot = baseline(20.0, 4.0, 2.5, 1.1);

        assert_eq!(engine().score(&trade, &snapshot), engine().score(&trade, &snapshot));
    }

    proptest! {
        #[test]
        fn prop_size_shock_monotone_in_size(
            a in 0u64..100_000,
            b in 0u64..100_000,
            median in 0.0f64..1_000.0,
            mad in 0.0f64..500.0,
        ) {
            let (small, large) = if a <= b { (a, b) } else { (b, a) };
            let snapshot = baseline(median, mad, 1.0, 1.0);
            let s = engine();
            let lo = s.score(&make_trade(small, 50), &snapshot);
            let hi = s.score(&make_trade(large, 50), &snapshot);
            prop_assert!(hi.components.size_shock >= lo.components.size_shock);
        }

        #[test]
        fn prop_burst_monotone_in_rate(
            a in 0.0f64..100.0,
            b in 0.0f64..100.0,
            rate_baseline in 0.0f64..10.0,
        ) {
            let (slow, fast) = if a <= b { (a, b) } else { (b, a) };
            let s = engine();
            let trade = make_trade(10, 50);
            let lo = s.score(&trade, &baseline(10.0, 3.0, slow, rate_baseline));
            let hi = s.score(&trade, &baseline(10.0, 3.0, fast, rate_baseline));
            prop_assert!(hi.components.burst >= lo.components.burst);
        }

        #[test]
        fn prop_score_bounded_and_finite(
            size in 0u64..10_000_000,
            price in 1i64..100,
            median in 0.0f64..1e6,
            mad in 0.0f64..1e6,
            rate in 0.0f64..1e4,
            rate_baseline in 0.0f64..1e4,
        ) {
            let result = engine().score(&make_trade(size, price), &baseline(median, mad, rate, rate_baseline));
            prop_assert!(result.is_finite());
            prop_assert!((0.0..=100.0).contains(&result.score));
        }
    }
}
