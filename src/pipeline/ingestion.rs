//! Pipeline ingestion - async channel processor for trade events
//!
//! ```text
//! feed ──mpsc<TradeEvent>──▶ ingestion ──▶ TradeLedger::admit ──▶ PipelineEngine
//!                                                                  │
//!                                     notifier ◀──mpsc<Alert>──────┘
//! ```
//!
//! The trade channel is awaited (the feed blocks when it is full). The alert
//! queue is never awaited: when it is full the newest alert is dropped and
//! logged, so a slow notifier cannot stall scoring.

use super::db::TradeLedger;
use super::engine::PipelineEngine;
use super::types::{Alert, TradeEvent};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval_at, Duration, Instant};

/// Counters reported by the heartbeat and returned when ingestion stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    pub trades_received: u64,
    pub duplicates: u64,
    pub skipped: u64,
    /// Trades whose processing panicked; also counted in `skipped`
    pub engine_panics: u64,
    pub store_errors: u64,
    pub alerts_queued: u64,
    pub alerts_dropped: u64,
}

/// Start pipeline ingestion from the trade channel
///
/// Main loop:
/// 1. Receives trades from the feed via mpsc channel
/// 2. Admits each through the ledger (duplicates are discarded, store errors fail open)
/// 3. Processes admitted trades through the PipelineEngine (a panic skips only that trade)
/// 4. Queues any resulting alert without waiting
/// 5. Every heartbeat: logs counters and evicts idle tickers
///
/// Runs until the trade channel is closed. Dropping `alert_tx` on return
/// closes the alert queue so delivery can drain and stop.
pub async fn start_pipeline_ingestion(
    mut rx: mpsc::Receiver<TradeEvent>,
    engine: Arc<Mutex<PipelineEngine>>,
    ledger: Arc<dyn TradeLedger>,
    alert_tx: mpsc::Sender<Alert>,
    heartbeat_interval_ms: u64,
) -> IngestionSummary {
    log::info!("🚀 Starting pipeline ingestion");
    log::info!("   ├─ Heartbeat interval: {}ms", heartbeat_interval_ms);
    log::info!("   └─ Waiting for trades...");

    let period = Duration::from_millis(heartbeat_interval_ms.max(1));
    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut summary = IngestionSummary::default();
    let mut window_count = 0u64;
    let mut window_start = std::time::Instant::now();

    loop {
        tokio::select! {
            maybe_trade = rx.recv() => {
                let Some(trade) = maybe_trade else {
                    log::warn!("⚠️  Trade channel closed, stopping ingestion");
                    break;
                };
                summary.trades_received += 1;
                window_count += 1;
                handle_trade(trade, &engine, ledger.as_ref(), &alert_tx, &mut summary).await;
            }

            _ = heartbeat.tick() => {
                let (stats, active, pruned) = {
                    let mut guard = engine.lock().unwrap_or_else(|e| e.into_inner());
                    let pruned = guard.prune_inactive();
                    (guard.stats(), guard.active_tickers(), pruned)
                };

                let elapsed = window_start.elapsed().as_secs_f64().max(f64::EPSILON);
                log::info!(
                    "💓 {:.1} trades/sec | total {} | dup {} | skipped {} | high {} | alerts {}/{} queued/dropped | tickers {} | alert queue {}/{}",
                    window_count as f64 / elapsed,
                    summary.trades_received,
                    summary.duplicates,
                    summary.skipped,
                    stats.high_scores,
                    summary.alerts_queued,
                    summary.alerts_dropped,
                    active,
                    alert_tx.max_capacity() - alert_tx.capacity(),
                    alert_tx.max_capacity(),
                );
                if pruned.0 > 0 || pruned.1 > 0 {
                    log::debug!("🧹 Evicted {} idle tickers, {} expired cooldowns", pruned.0, pruned.1);
                }

                let backlog = rx.len();
                if backlog > rx.max_capacity() / 2 {
                    log::warn!(
                        "⚠️  Trade channel usage high: {}/{} ({}%)",
                        backlog,
                        rx.max_capacity(),
                        (backlog * 100) / rx.max_capacity().max(1)
                    );
                }

                window_count = 0;
                window_start = std::time::Instant::now();
            }
        }
    }

    log::info!(
        "✅ Pipeline ingestion stopped: {} trades, {} duplicates, {} skipped, {} alerts queued, {} dropped",
        summary.trades_received,
        summary.duplicates,
        summary.skipped,
        summary.alerts_queued,
        summary.alerts_dropped
    );

    summary
}

async fn handle_trade(
    trade: TradeEvent,
    engine: &Arc<Mutex<PipelineEngine>>,
    ledger: &dyn TradeLedger,
    alert_tx: &mpsc::Sender<Alert>,
    summary: &mut IngestionSummary,
) {
    match ledger.admit(&trade).await {
        Ok(true) => {}
        Ok(false) => {
            summary.duplicates += 1;
            log::debug!("Duplicate trade {} ({}) discarded", trade.trade_id, trade.ticker);
            return;
        }
        Err(e) => {
            summary.store_errors += 1;
            log::error!("❌ Trade store error for {}: {} (processing anyway)", trade.trade_id, e);
        }
    }

    let trade_id = trade.trade_id.clone();
    let result = {
        let mut guard = engine.lock().unwrap_or_else(|e| e.into_inner());
        panic::catch_unwind(AssertUnwindSafe(|| guard.process_trade(trade)))
    };

    let outcome = match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            summary.skipped += 1;
            log::warn!("⚠️  Trade skipped: {}", e);
            return;
        }
        Err(_) => {
            summary.skipped += 1;
            summary.engine_panics += 1;
            log::error!("❌ Engine panicked on trade {}, skipped", trade_id);
            return;
        }
    };

    let Some(alert) = outcome.alert else {
        return;
    };

    match alert_tx.try_send(alert) {
        Ok(()) => {
            summary.alerts_queued += 1;
        }
        Err(TrySendError::Full(alert)) => {
            summary.alerts_dropped += 1;
            log::warn!(
                "⚠️  Alert queue full, dropping {} alert for {}",
                alert.class.as_str(),
                alert.tickers.join(",")
            );
        }
        Err(TrySendError::Closed(alert)) => {
            summary.alerts_dropped += 1;
            log::warn!(
                "⚠️  Alert queue closed, dropping {} alert for {}",
                alert.class.as_str(),
                alert.tickers.join(",")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::PolicyConfig;
    use crate::pipeline::db::{MemoryLedger, StoreError};
    use crate::pipeline::types::{AlertClass, Side};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn make_trade(ticker: &str, id: &str, offset_secs: i64, size: u64) -> TradeEvent {
        TradeEvent {
            ticker: ticker.to_string(),
            trade_id: id.to_string(),
            price: Decimal::new(50, 2),
            size,
            side: Side::Yes,
            occurred_at: Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).unwrap(),
        }
    }

    fn spike_sequence(ticker: &str) -> Vec<TradeEvent> {
        let mut trades: Vec<TradeEvent> = (0..5)
            .map(|i| make_trade(ticker, &format!("{}-{}", ticker, i), i, 10))
            .collect();
        trades.push(make_trade(ticker, &format!("{}-spike", ticker), 10, 100));
        trades
    }

    struct FailingLedger;

    #[async_trait]
    impl TradeLedger for FailingLedger {
        async fn admit(&self, _trade: &TradeEvent) -> Result<bool, StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    async fn run(
        trades: Vec<TradeEvent>,
        ledger: Arc<dyn TradeLedger>,
        alert_buffer: usize,
    ) -> (IngestionSummary, Vec<Alert>) {
        run_with_policy(trades, ledger, alert_buffer, PolicyConfig::default()).await
    }

    async fn run_with_policy(
        trades: Vec<TradeEvent>,
        ledger: Arc<dyn TradeLedger>,
        alert_buffer: usize,
        policy: PolicyConfig,
    ) -> (IngestionSummary, Vec<Alert>) {
        let (tx, rx) = mpsc::channel(64);
        let (alert_tx, mut alert_rx) = mpsc::channel(alert_buffer);
        let engine = Arc::new(Mutex::new(PipelineEngine::new(policy)));

        for trade in trades {
            tx.send(trade).await.unwrap();
        }
        drop(tx);

        let summary = start_pipeline_ingestion(rx, engine, ledger, alert_tx, 60_000).await;

        let mut alerts = Vec::new();
        while let Some(alert) = alert_rx.recv().await {
            alerts.push(alert);
        }
        (summary, alerts)
    }

    #[tokio::test]
    async fn test_spike_produces_solo_alert() {
        let (summary, alerts) = run(spike_sequence("X"), Arc::new(MemoryLedger::new()), 8).await;

        assert_eq!(summary.trades_received, 6);
        assert_eq!(summary.alerts_queued, 1);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].class, AlertClass::Solo);
    }

    #[tokio::test]
    async fn test_duplicates_are_discarded_before_engine() {
        let mut trades = spike_sequence("X");
        // replay the whole sequence: every trade is a duplicate
        trades.extend(spike_sequence("X"));

        let (summary, alerts) = run(trades, Arc::new(MemoryLedger::new()), 8).await;

        assert_eq!(summary.trades_received, 12);
        assert_eq!(summary.duplicates, 6);
        assert_eq!(alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_store_errors_fail_open() {
        let (summary, alerts) = run(spike_sequence("X"), Arc::new(FailingLedger), 8).await;

        assert_eq!(summary.store_errors, 6);
        assert_eq!(summary.duplicates, 0);
        assert_eq!(alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_full_alert_queue_drops_newest() {
        let mut trades = spike_sequence("A");
        trades.extend(spike_sequence("B"));

        let (summary, alerts) = run(trades, Arc::new(MemoryLedger::new()), 1).await;

        assert_eq!(summary.alerts_queued, 1);
        assert_eq!(summary.alerts_dropped, 1);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].tickers, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_trade_is_skipped() {
        let mut trades = vec![make_trade("", "bad", 0, 10)];
        trades.extend(spike_sequence("X"));

        let (summary, alerts) = run(trades, Arc::new(MemoryLedger::new()), 8).await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_engine_panic_skips_trade_and_keeps_ingesting() {
        // unvalidated policy: the daily window overflows the date range on every insert
        let mut policy = PolicyConfig::default();
        policy.windows.daily_secs = 9_000_000_000_000;
        assert!(policy.validate().is_err());

        let (summary, alerts) =
            run_with_policy(spike_sequence("X"), Arc::new(MemoryLedger::new()), 8, policy).await;

        assert_eq!(summary.trades_received, 6);
        assert_eq!(summary.engine_panics, 6);
        assert_eq!(summary.skipped, 6);
        assert!(alerts.is_empty());
    }
}
