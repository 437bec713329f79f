//! Pipeline Engine - per-trade orchestration
//!
//! ```text
//! TradeEvent
//!     ↓
//! WindowStore::record
//!     ↓
//! BaselineEstimator::estimate → BaselineSnapshot
//!     ↓
//! ScoringEngine::score → ScoreResult
//!     ↓
//! ClusterDetector::observe / evaluate → Option<ClusterSignal>
//!     ↓
//! AlertDispatcher (solo → cluster → debug) → Option<Alert>
//! ```
//!
//! All per-ticker state is owned here and mutated only through `process_trade`.
//! The engine does no I/O; callers hand the returned alert to the delivery queue.

use super::baseline::BaselineEstimator;
use super::cluster::ClusterDetector;
use super::config::PolicyConfig;
use super::dispatcher::{AlertDispatcher, Decision};
use super::scorer::ScoringEngine;
use super::types::{Alert, AlertClass, BaselineSnapshot, ClusterSignal, ScoreResult, TradeEvent};
use super::windows::WindowStore;
use chrono::{DateTime, Utc};
use log::{debug, info};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Invalid trade {trade_id}: {reason}")]
    InvalidTrade { trade_id: String, reason: String },
    #[error("Non-finite score for {ticker} trade {trade_id}")]
    NonFiniteScore { ticker: String, trade_id: String },
}

/// Everything the engine derived from one trade
#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub baseline: BaselineSnapshot,
    pub score: ScoreResult,
    pub cluster: Option<ClusterSignal>,
    pub alert: Option<Alert>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub trades_processed: u64,
    pub trades_rejected: u64,
    pub high_scores: u64,
    pub solo_alerts: u64,
    pub cluster_alerts: u64,
    pub debug_alerts: u64,
}

pub struct PipelineEngine {
    policy: PolicyConfig,
    windows: WindowStore,
    estimator: BaselineEstimator,
    scorer: ScoringEngine,
    cluster: ClusterDetector,
    dispatcher: AlertDispatcher,
    stats: EngineStats,

    /// Arrival clock for cooldowns and daily caps (mockable in tests)
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl PipelineEngine {
    /// Create a pipeline engine using the system clock
    pub fn new(policy: PolicyConfig) -> Self {
        Self::new_with_timestamp_fn(policy, Box::new(Utc::now))
    }

    /// Create a pipeline engine with a custom arrival clock
    pub fn new_with_timestamp_fn(
        policy: PolicyConfig,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            policy,
            windows: WindowStore::new(policy.windows),
            estimator: BaselineEstimator::new(policy.baseline, policy.windows),
            scorer: ScoringEngine::new(policy.scoring),
            cluster: ClusterDetector::new(policy.cluster),
            dispatcher: AlertDispatcher::new(policy.alerts),
            stats: EngineStats::default(),
            now_fn,
        }
    }

    /// Run one deduplicated trade through the whole pipeline
    ///
    /// Produces at most one alert. Solo is evaluated first; cluster only when
    /// no solo alert went out; debug only when neither did.
    pub fn process_trade(&mut self, trade: TradeEvent) -> Result<TradeOutcome, PipelineError> {
        if trade.ticker.trim().is_empty() {
            self.stats.trades_rejected += 1;
            return Err(PipelineError::InvalidTrade {
                trade_id: trade.trade_id,
                reason: "empty ticker".to_string(),
            });
        }

        let now = (self.now_fn)();

        self.windows.record(&trade);
        let baseline = self.estimator.estimate(&mut self.windows, &trade.ticker);
        let score = self.scorer.score(&trade, &baseline);

        if !score.is_finite() {
            self.stats.trades_rejected += 1;
            return Err(PipelineError::NonFiniteScore {
                ticker: trade.ticker,
                trade_id: trade.trade_id,
            });
        }
        self.stats.trades_processed += 1;

        if score.score >= self.policy.cluster.floor {
            self.stats.high_scores += 1;
            info!(
                "📈 {} scored {:.1} ({})",
                score.ticker,
                score.score,
                score.reasons().join(", ")
            );
        } else {
            debug!(
                "{} {} x{} scored {:.1} (low_conf={})",
                trade.ticker,
                trade.side.as_str(),
                trade.size,
                score.score,
                baseline.is_low_confidence()
            );
        }

        let sampled = self.dispatcher.sample_debug(&trade);

        let cluster = if self.cluster.observe(&score) {
            self.cluster.evaluate(score.at)
        } else {
            None
        };

        let mut decision = self.dispatcher.evaluate_solo(&trade, &score, now);
        if !decision.is_dispatch() {
            if let Some(signal) = &cluster {
                decision = self.dispatcher.evaluate_cluster(signal, now);
            }
        }
        if !decision.is_dispatch() && self.policy.alerts.debug.enabled {
            decision = self.dispatcher.evaluate_debug(&trade, &score, sampled, now);
        }

        if let Decision::Suppressed(reason) = &decision {
            if score.score >= self.policy.alerts.cluster_threshold {
                debug!("🔕 {} suppressed: {:?}", score.ticker, reason);
            }
        }

        let alert = decision.alert();
        if let Some(alert) = &alert {
            match alert.class {
                AlertClass::Solo => self.stats.solo_alerts += 1,
                AlertClass::Cluster => self.stats.cluster_alerts += 1,
                AlertClass::Debug => self.stats.debug_alerts += 1,
            }
        }

        Ok(TradeOutcome {
            baseline,
            score,
            cluster,
            alert,
        })
    }

    /// Evict tickers idle longer than the daily window and forget elapsed cooldowns
    ///
    /// Returns (tickers evicted, cooldowns forgotten).
    pub fn prune_inactive(&mut self) -> (usize, usize) {
        let tickers = match self.windows.newest_seen() {
            Some(reference) => self.windows.prune_inactive(reference),
            None => 0,
        };
        let cooldowns = self.dispatcher.prune((self.now_fn)());
        (tickers, cooldowns)
    }

    pub fn active_tickers(&self) -> usize {
        self.windows.ticker_count()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn dispatcher_mut(&mut self) -> &mut AlertDispatcher {
        &mut self.dispatcher
    }
}
