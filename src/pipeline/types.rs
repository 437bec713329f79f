//! Core data types flowing through the anomaly pipeline
//!
//! ```text
//! TradeEvent → WindowStore → BaselineSnapshot → ScoreResult → ClusterSignal → Alert
//! ```
//!
//! Everything here is plain data. State lives in the components that own it
//! (`WindowStore`, `ClusterDetector`, `AlertDispatcher`).

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Taker side of a prediction-market trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "yes" => Some(Side::Yes),
            "no" => Some(Side::No),
            _ => None,
        }
    }
}

/// A single executed trade, immutable once ingested
///
/// `trade_id` is the identity key used for deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub ticker: String,
    pub trade_id: String,
    /// Price paid by the taker, in dollars (0.01 - 0.99 on a binary market)
    pub price: Decimal,
    /// Contracts traded
    pub size: u64,
    pub side: Side,
    pub occurred_at: DateTime<Utc>,
}

impl TradeEvent {
    /// Dollar notional of the trade (contracts × price)
    pub fn notional(&self) -> f64 {
        self.price
            .checked_mul(Decimal::from(self.size))
            .and_then(|n| n.to_f64())
            .unwrap_or_else(|| self.price.to_f64().unwrap_or(0.0) * self.size as f64)
    }
}

/// Robust size statistics over the 24h window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeStats {
    pub median: f64,
    /// Raw median absolute deviation
    pub mad: f64,
    /// MAD multiplied by the normal consistency constant
    pub mad_scaled: f64,
}

/// Per-trade baseline derived from the window store
///
/// `size_stats` is `None` when the 24h window holds fewer trades than the
/// configured sample floor (low confidence).
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineSnapshot {
    pub ticker: String,
    pub size_stats: Option<SizeStats>,
    /// Trades per minute over the hourly window
    pub rate_60m: f64,
    /// Longer-run expected trades per minute, pro-rated from the daily window
    pub rate_60m_baseline: f64,
    pub trades_1m: usize,
    pub trades_5m: usize,
    pub trades_60m: usize,
    pub trades_24h: usize,
}

impl BaselineSnapshot {
    pub fn is_low_confidence(&self) -> bool {
        self.size_stats.is_none()
    }

    pub fn median_24h(&self) -> Option<f64> {
        self.size_stats.map(|s| s.median)
    }

    pub fn mad_24h(&self) -> Option<f64> {
        self.size_stats.map(|s| s.mad)
    }
}

/// Sub-scores (0-100 each) plus the raw inputs that produced them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreComponents {
    pub size_shock: f64,
    pub burst: f64,
    pub whale: f64,
    pub size_z: Option<f64>,
    pub burst_ratio: f64,
    pub notional: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub ticker: String,
    pub trade_id: String,
    /// Final unusual score in [0, 100]
    pub score: f64,
    pub components: ScoreComponents,
    pub at: DateTime<Utc>,
}

impl ScoreResult {
    pub fn is_finite(&self) -> bool {
        let c = &self.components;
        self.score.is_finite()
            && c.size_shock.is_finite()
            && c.burst.is_finite()
            && c.whale.is_finite()
            && c.burst_ratio.is_finite()
            && c.size_z.map_or(true, f64::is_finite)
    }

    /// Human-readable reasons for every component that contributed
    pub fn reasons(&self) -> Vec<String> {
        let c = &self.components;
        let mut reasons = Vec::new();
        if c.size_shock > 0.0 {
            if let Some(z) = c.size_z {
                reasons.push(format!("size_z={:.1}", z));
            }
        }
        if c.burst > 0.0 {
            reasons.push(format!("burst={:.1}x", c.burst_ratio));
        }
        if c.whale > 0.0 {
            reasons.push(format!("notional=${:.0}", c.notional));
        }
        reasons
    }
}

/// Correlated spike across distinct tickers inside the cluster lookback
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSignal {
    pub tickers: BTreeSet<String>,
    /// Highest score among contributing entries
    pub max_score: f64,
    /// Number of qualifying score entries (may exceed the ticker count)
    pub entries: usize,
    pub at: DateTime<Utc>,
}

impl ClusterSignal {
    pub fn ticker_count(&self) -> usize {
        self.tickers.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertClass {
    Solo,
    Cluster,
    Debug,
}

impl AlertClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertClass::Solo => "solo",
            AlertClass::Cluster => "cluster",
            AlertClass::Debug => "debug",
        }
    }

    pub fn all() -> [AlertClass; 3] {
        [AlertClass::Solo, AlertClass::Cluster, AlertClass::Debug]
    }
}

/// Fully-formed outbound alert handed to the notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub class: AlertClass,
    pub tickers: Vec<String>,
    pub score: f64,
    /// Arrival time of the trade that triggered the alert
    pub at: DateTime<Utc>,
    pub summary: String,
}
