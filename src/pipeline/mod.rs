//! # Trade Anomaly Pipeline
//!
//! Stateful detection core: every deduplicated trade updates its ticker's
//! rolling windows, gets a robust baseline and a 0-100 unusual score, is
//! offered to the cross-ticker cluster detector, and finally passes through the
//! alert dispatcher, which emits at most one alert per trade.
//!
//! ## Module Organization
//!
//! - `types` - Core data structures (TradeEvent, BaselineSnapshot, ScoreResult, Alert)
//! - `windows` - Per-ticker 1m/5m/60m/24h rolling windows
//! - `baseline` - Median / MAD / trade-rate baseline
//! - `scorer` - Size-shock, burst and whale sub-scores combined into one score
//! - `cluster` - Correlated multi-ticker spike detection
//! - `dispatcher` - Thresholds, cooldowns and daily caps
//! - `engine` - Per-trade orchestration of all of the above
//! - `ingestion` - Async loop between the feed, the store and the alert queue
//! - `db` - SQLite trade ledger for deduplication
//! - `config` - Policy and runtime configuration from the environment

pub mod baseline;
pub mod cluster;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod engine;
pub mod ingestion;
pub mod scorer;
pub mod types;
pub mod windows;

// Re-export commonly used types
pub use config::{ConfigError, PipelineConfig, PolicyConfig};
pub use db::{MemoryLedger, SqliteTradeStore, StoreError, TradeLedger};
pub use dispatcher::{AlertDispatcher, Decision, GateState, SuppressReason};
pub use engine::{PipelineEngine, PipelineError, TradeOutcome};
pub use ingestion::{start_pipeline_ingestion, IngestionSummary};
pub use types::{Alert, AlertClass, BaselineSnapshot, ClusterSignal, ScoreResult, Side, TradeEvent};
pub use windows::{WindowSize, WindowStore};
