//! Pipeline Runtime - live anomaly monitor
//!
//! Wires the feed, the trade store, the pipeline engine and the notifier:
//! - Loads policy / runtime / feed configuration from the environment (.env honoured)
//! - Opens the SQLite trade store and applies the schema
//! - Spawns alert delivery, ingestion and the feed
//! - On CTRL+C (or when a replay ends) drains the queues and exits
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime
//!
//! Environment variables (see also PolicyConfig for the detection tunables):
//!   FEED_URL / FEED_REPLAY_PATH - trade source (one is required)
//!   KALSHIFLOW_DB_PATH - SQLite database path (default: kalshi_trades.db)
//!   TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID - alert delivery (log only when unset)
//!   STREAMER_CHANNEL_BUFFER - trade channel size (default: 10000)

use dotenv::dotenv;
use kalshiflow::notifier::{start_alert_delivery, LogNotifier, Notifier, TelegramNotifier};
use kalshiflow::pipeline::{
    config::{PipelineConfig, PolicyConfig},
    db::{SqliteTradeStore, TradeLedger},
    engine::PipelineEngine,
    ingestion::start_pipeline_ingestion,
    types::{Alert, TradeEvent},
};
use kalshiflow::streamer_core::{
    run_feed, ExponentialBackoff, FeedConfig, FeedError, FeedMode, FeedStats, ReplaySource, TradeSource,
    WsSource,
};
use log::{error, info, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

const STARTUP_MESSAGE: &str = "✅ Kalshi monitor is live.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Kalshi anomaly pipeline starting");

    let policy = PolicyConfig::from_env()?;
    let config = PipelineConfig::from_env()?;
    let feed_config = FeedConfig::from_env()?;
    let mode = feed_config.mode()?;

    info!("   ├─ Database: {} (env: {})", config.db_path, config.env);
    info!("   ├─ Channel buffer: {} trades / {} alerts", config.channel_buffer, config.alert_buffer);
    info!(
        "   ├─ Thresholds: solo {} / cluster {} | daily cap {}",
        policy.alerts.solo_threshold, policy.alerts.cluster_threshold, policy.alerts.daily_cap
    );
    info!(
        "   └─ Alert mode: {}",
        if policy.alerts.debug.enabled { "debug" } else { "prod" }
    );

    info!("🔧 Initializing database...");
    let ledger: Arc<dyn TradeLedger> = Arc::new(SqliteTradeStore::open(
        &config.db_path,
        &config.schema_dir,
        &config.env,
    )?);
    info!("✅ Database initialized");

    let notifier: Arc<dyn Notifier> = match TelegramNotifier::from_env()? {
        Some(telegram) => Arc::new(telegram),
        None => {
            warn!("⚠️  TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID not set, alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };

    info!("{}", STARTUP_MESSAGE);
    if let Err(e) = notifier.send_text(STARTUP_MESSAGE).await {
        warn!("⚠️  Startup notification failed: {}", e);
    }

    let engine = Arc::new(Mutex::new(PipelineEngine::new(policy)));
    let (tx, rx) = mpsc::channel::<TradeEvent>(config.channel_buffer);
    let (alert_tx, alert_rx) = mpsc::channel::<Alert>(config.alert_buffer);

    info!("🚀 Spawning background tasks...");

    let delivery_handle = tokio::spawn(start_alert_delivery(alert_rx, notifier.clone()));
    info!("   ├─ ✅ Alert delivery task spawned ({})", notifier.name());

    let ingestion_handle = tokio::spawn(start_pipeline_ingestion(
        rx,
        engine.clone(),
        ledger,
        alert_tx,
        config.heartbeat_interval_ms,
    ));
    info!("   ├─ ✅ Ingestion task spawned");

    let stats = Arc::new(FeedStats::default());
    let backoff = ExponentialBackoff::new(
        feed_config.backoff_initial_secs,
        feed_config.backoff_max_secs,
        feed_config.max_retries,
    );
    let mut feed_handle = match mode {
        FeedMode::WebSocket(url) => {
            info!("   └─ ✅ Feed task spawned (websocket: {})", url);
            let headers = feed_config.headers.clone();
            let tickers = feed_config.tickers.clone();
            tokio::spawn(run_feed(
                move || {
                    let url = url.clone();
                    let headers = headers.clone();
                    let tickers = tickers.clone();
                    async move {
                        let source = WsSource::connect(&url, &headers, &tickers).await?;
                        Ok::<Box<dyn TradeSource>, FeedError>(Box::new(source))
                    }
                },
                tx,
                backoff,
                stats.clone(),
            ))
        }
        FeedMode::Replay(path) => {
            info!("   └─ ✅ Feed task spawned (replay: {})", path);
            tokio::spawn(run_feed(
                move || {
                    let path = path.clone();
                    async move {
                        let source = ReplaySource::open(&path).await?;
                        Ok::<Box<dyn TradeSource>, FeedError>(Box::new(source))
                    }
                },
                tx,
                backoff,
                stats.clone(),
            ))
        }
    };

    info!("🔄 Press CTRL+C to shutdown gracefully");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
            }
            // dropping the feed task closes the trade channel
            feed_handle.abort();
        }
        result = &mut feed_handle => {
            match result {
                Ok(Ok(())) => info!("✅ Feed finished"),
                Ok(Err(e)) => error!("❌ Feed stopped: {}", e),
                Err(e) => error!("❌ Feed task panicked: {}", e),
            }
        }
    }

    let feed = stats.snapshot();
    info!(
        "📊 Feed: {} messages, {} trades, {} rejected, {} reconnects",
        feed.messages, feed.trades, feed.rejected, feed.reconnects
    );

    // ingestion drains the trade channel, then drops the alert sender
    match ingestion_handle.await {
        Ok(summary) => info!(
            "📊 Ingestion: {} trades, {} duplicates, {} skipped, {} alerts",
            summary.trades_received, summary.duplicates, summary.skipped, summary.alerts_queued
        ),
        Err(e) => error!("❌ Ingestion task failed: {}", e),
    }

    let drain = Duration::from_secs(config.shutdown_drain_secs);
    match timeout(drain, delivery_handle).await {
        Ok(Ok(summary)) => info!(
            "📊 Delivery: {} delivered, {} failed",
            summary.delivered, summary.failed
        ),
        Ok(Err(e)) => error!("❌ Delivery task failed: {}", e),
        Err(_) => warn!(
            "⚠️  Alert queue not drained within {}s, pending alerts dropped",
            config.shutdown_drain_secs
        ),
    }

    info!("✅ Pipeline runtime stopped");
    Ok(())
}
