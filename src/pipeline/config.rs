//! Pipeline configuration from environment variables
//!
//! Two layers:
//! - `PolicyConfig`: every tunable that shapes detection (windows, scoring
//!   weights, thresholds, cooldowns, caps)
//! - `PipelineConfig`: runtime plumbing (database, channel sizes, heartbeat)
//!
//! Both parse through a lookup closure so tests never touch the process
//! environment. Unset or empty variables fall back to defaults; a value that is
//! present but unparseable is an error.

use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

pub(crate) fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

pub(crate) fn read_var<T: FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{} = {:?}", key, raw))),
        _ => Ok(default),
    }
}

/// Durations (seconds) of the four per-ticker windows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowDurations {
    pub short_secs: i64,
    pub medium_secs: i64,
    pub hourly_secs: i64,
    pub daily_secs: i64,
}

impl Default for WindowDurations {
    fn default() -> Self {
        Self {
            short_secs: 60,
            medium_secs: 5 * 60,
            hourly_secs: 60 * 60,
            daily_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselinePolicy {
    /// Below this many trades in the daily window the baseline is low-confidence
    pub min_samples: usize,
    /// Normal consistency constant applied to the raw MAD
    pub mad_consistency: f64,
}

impl Default for BaselinePolicy {
    fn default() -> Self {
        Self {
            min_samples: 5,
            mad_consistency: 1.4826,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub size_shock: f64,
    pub burst: f64,
    pub whale: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            size_shock: 1.0,
            burst: 0.8,
            whale: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringPolicy {
    /// Floor for the scaled MAD, in contracts
    pub scale_floor: f64,
    /// Floor for the baseline rate, in trades per minute
    pub rate_floor: f64,
    /// Robust z at which the size-shock sub-score saturates
    pub size_shock_cap: f64,
    /// Burst ratio at which the burst sub-score saturates
    pub burst_cap: f64,
    /// Dollar notional where the whale sub-score starts (at 50)
    pub whale_floor_notional: f64,
    /// Dollar notional where the whale sub-score saturates (at 100)
    pub whale_full_notional: f64,
    pub weights: ScoreWeights,
    /// Share of the non-leading weighted components added on top of the leader
    pub corroboration: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            scale_floor: 1.0,
            rate_floor: 0.01,
            size_shock_cap: 8.0,
            burst_cap: 10.0,
            whale_floor_notional: 1_000.0,
            whale_full_notional: 2_500.0,
            weights: ScoreWeights::default(),
            corroboration: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterPolicy {
    /// Minimum score for an entry to join the cluster window
    pub floor: f64,
    pub lookback_secs: i64,
    pub min_tickers: usize,
}

impl Default for ClusterPolicy {
    fn default() -> Self {
        Self {
            floor: 70.0,
            lookback_secs: 5 * 60,
            min_tickers: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugPolicy {
    pub enabled: bool,
    pub sample_every: u64,
    pub min_contracts: u64,
    pub max_per_minute: u32,
}

impl Default for DebugPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_every: 20,
            min_contracts: 200,
            max_per_minute: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertPolicy {
    pub solo_threshold: f64,
    pub cluster_threshold: f64,
    pub solo_cooldown_secs: i64,
    pub cluster_cooldown_secs: i64,
    /// Per alert class, reset at UTC midnight
    pub daily_cap: u32,
    pub debug: DebugPolicy,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            solo_threshold: 85.0,
            cluster_threshold: 70.0,
            solo_cooldown_secs: 10 * 60,
            cluster_cooldown_secs: 5 * 60,
            daily_cap: 20,
            debug: DebugPolicy::default(),
        }
    }
}

/// Every detection tunable, externally supplied
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PolicyConfig {
    pub windows: WindowDurations,
    pub baseline: BaselinePolicy,
    pub scoring: ScoringPolicy,
    pub cluster: ClusterPolicy,
    pub alerts: AlertPolicy,
}

impl PolicyConfig {
    /// Load policy from environment variables (`WINDOW_*_SECS`, `SOLO_THRESHOLD`, ...)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();

        let windows = WindowDurations {
            short_secs: read_var(lookup, "WINDOW_SHORT_SECS", d.windows.short_secs)?,
            medium_secs: read_var(lookup, "WINDOW_MEDIUM_SECS", d.windows.medium_secs)?,
            hourly_secs: read_var(lookup, "WINDOW_HOURLY_SECS", d.windows.hourly_secs)?,
            daily_secs: read_var(lookup, "WINDOW_DAILY_SECS", d.windows.daily_secs)?,
        };

        let baseline = BaselinePolicy {
            min_samples: read_var(lookup, "BASELINE_MIN_SAMPLES", d.baseline.min_samples)?,
            mad_consistency: read_var(lookup, "MAD_CONSISTENCY", d.baseline.mad_consistency)?,
        };

        let scoring = ScoringPolicy {
            scale_floor: read_var(lookup, "SCALE_FLOOR", d.scoring.scale_floor)?,
            rate_floor: read_var(lookup, "RATE_FLOOR", d.scoring.rate_floor)?,
            size_shock_cap: read_var(lookup, "SIZE_SHOCK_CAP", d.scoring.size_shock_cap)?,
            burst_cap: read_var(lookup, "BURST_CAP", d.scoring.burst_cap)?,
            whale_floor_notional: read_var(
                lookup,
                "WHALE_FLOOR_NOTIONAL",
                d.scoring.whale_floor_notional,
            )?,
            whale_full_notional: read_var(
                lookup,
                "WHALE_FULL_NOTIONAL",
                d.scoring.whale_full_notional,
            )?,
            weights: ScoreWeights {
                size_shock: read_var(lookup, "WEIGHT_SIZE_SHOCK", d.scoring.weights.size_shock)?,
                burst: read_var(lookup, "WEIGHT_BURST", d.scoring.weights.burst)?,
                whale: read_var(lookup, "WEIGHT_WHALE", d.scoring.weights.whale)?,
            },
            corroboration: read_var(lookup, "SCORE_CORROBORATION", d.scoring.corroboration)?,
        };

        let cluster = ClusterPolicy {
            floor: read_var(lookup, "CLUSTER_FLOOR", d.cluster.floor)?,
            lookback_secs: read_var(lookup, "CLUSTER_LOOKBACK_SECS", d.cluster.lookback_secs)?,
            min_tickers: read_var(lookup, "CLUSTER_MIN_TICKERS", d.cluster.min_tickers)?,
        };

        let alert_mode: String = read_var(lookup, "ALERT_MODE", "prod".to_string())?;
        let alerts = AlertPolicy {
            solo_threshold: read_var(lookup, "SOLO_THRESHOLD", d.alerts.solo_threshold)?,
            cluster_threshold: read_var(lookup, "CLUSTER_THRESHOLD", d.alerts.cluster_threshold)?,
            solo_cooldown_secs: read_var(lookup, "SOLO_COOLDOWN_SECS", d.alerts.solo_cooldown_secs)?,
            cluster_cooldown_secs: read_var(
                lookup,
                "CLUSTER_COOLDOWN_SECS",
                d.alerts.cluster_cooldown_secs,
            )?,
            daily_cap: read_var(lookup, "DAILY_ALERT_CAP", d.alerts.daily_cap)?,
            debug: DebugPolicy {
                enabled: alert_mode.eq_ignore_ascii_case("debug"),
                sample_every: read_var(lookup, "DEBUG_SAMPLE_EVERY", d.alerts.debug.sample_every)?,
                min_contracts: read_var(
                    lookup,
                    "DEBUG_MIN_CONTRACTS",
                    d.alerts.debug.min_contracts,
                )?,
                max_per_minute: read_var(
                    lookup,
                    "DEBUG_MAX_PER_MIN",
                    d.alerts.debug.max_per_minute,
                )?,
            },
        };

        let config = Self {
            windows,
            baseline,
            scoring,
            cluster,
            alerts,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject policies the pipeline cannot evaluate meaningfully
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.windows;
        for (name, value) in [
            ("WINDOW_DAILY_SECS", w.daily_secs),
            ("CLUSTER_LOOKBACK_SECS", self.cluster.lookback_secs),
            ("SOLO_COOLDOWN_SECS", self.alerts.solo_cooldown_secs),
            ("CLUSTER_COOLDOWN_SECS", self.alerts.cluster_cooldown_secs),
        ] {
            if value > MAX_DURATION_SECS {
                return Err(invalid(&format!(
                    "{} must be at most {} seconds",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        if w.short_secs <= 0 {
            return Err(invalid("WINDOW_SHORT_SECS must be positive"));
        }
        if !(w.short_secs < w.medium_secs
            && w.medium_secs < w.hourly_secs
            && w.hourly_secs < w.daily_secs)
        {
            return Err(invalid("window durations must be strictly increasing"));
        }

        if self.baseline.min_samples == 0 {
            return Err(invalid("BASELINE_MIN_SAMPLES must be at least 1"));
        }
        if !(self.baseline.mad_consistency > 0.0) {
            return Err(invalid("MAD_CONSISTENCY must be positive"));
        }

        let s = &self.scoring;
        if !(s.scale_floor > 0.0) || !(s.rate_floor > 0.0) {
            return Err(invalid("SCALE_FLOOR and RATE_FLOOR must be positive"));
        }
        if !(s.size_shock_cap > 0.0) {
            return Err(invalid("SIZE_SHOCK_CAP must be positive"));
        }
        if !(s.burst_cap > 1.0) {
            return Err(invalid("BURST_CAP must be greater than 1"));
        }
        if !(s.whale_floor_notional > 0.0 && s.whale_floor_notional < s.whale_full_notional) {
            return Err(invalid(
                "WHALE_FLOOR_NOTIONAL must be positive and below WHALE_FULL_NOTIONAL",
            ));
        }
        let weights = [s.weights.size_shock, s.weights.burst, s.weights.whale, s.corroboration];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(invalid("score weights must be finite and non-negative"));
        }

        if self.cluster.min_tickers == 0 {
            return Err(invalid("CLUSTER_MIN_TICKERS must be at least 1"));
        }
        if self.cluster.lookback_secs <= 0 {
            return Err(invalid("CLUSTER_LOOKBACK_SECS must be positive"));
        }

        let a = &self.alerts;
        for (name, value) in [
            ("CLUSTER_FLOOR", self.cluster.floor),
            ("SOLO_THRESHOLD", a.solo_threshold),
            ("CLUSTER_THRESHOLD", a.cluster_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(invalid(&format!("{} must be within 0-100", name)));
            }
        }
        if a.solo_cooldown_secs < 0 || a.cluster_cooldown_secs < 0 {
            return Err(invalid("cooldowns cannot be negative"));
        }
        if a.debug.sample_every == 0 {
            return Err(invalid("DEBUG_SAMPLE_EVERY must be at least 1"));
        }

        Ok(())
    }
}

/// Upper bound for any window, lookback or cooldown (ten years)
pub const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

fn invalid(msg: &str) -> ConfigError {
    ConfigError::InvalidValue(msg.to_string())
}

/// Runtime plumbing for the pipeline binary
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Directory of idempotent .sql schema files
    pub schema_dir: String,

    /// Environment tag stored with each trade (prod/demo)
    pub env: String,

    /// Trade channel capacity (feed → ingestion)
    pub channel_buffer: usize,

    /// Alert queue capacity (ingestion → notifier)
    pub alert_buffer: usize,

    /// Heartbeat / housekeeping interval in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Upper bound on draining queues at shutdown
    pub shutdown_drain_secs: u64,
}

impl PipelineConfig {
    /// Environment variables:
    /// - `KALSHIFLOW_DB_PATH` (default: kalshi_trades.db)
    /// - `KALSHIFLOW_SCHEMA_DIR` (default: sql)
    /// - `KALSHIFLOW_ENV` (default: prod)
    /// - `STREAMER_CHANNEL_BUFFER` (default: 10000)
    /// - `ALERT_CHANNEL_BUFFER` (default: 256)
    /// - `HEARTBEAT_INTERVAL_MS` (default: 60000)
    /// - `SHUTDOWN_DRAIN_SECS` (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = Self {
            db_path: read_var(lookup, "KALSHIFLOW_DB_PATH", "kalshi_trades.db".to_string())?,
            schema_dir: read_var(lookup, "KALSHIFLOW_SCHEMA_DIR", "sql".to_string())?,
            env: read_var(lookup, "KALSHIFLOW_ENV", "prod".to_string())?.to_lowercase(),
            channel_buffer: read_var(lookup, "STREAMER_CHANNEL_BUFFER", 10_000)?,
            alert_buffer: read_var(lookup, "ALERT_CHANNEL_BUFFER", 256)?,
            heartbeat_interval_ms: read_var(lookup, "HEARTBEAT_INTERVAL_MS", 60_000)?,
            shutdown_drain_secs: read_var(lookup, "SHUTDOWN_DRAIN_SECS", 10)?,
        };

        if config.channel_buffer == 0 || config.alert_buffer == 0 {
            return Err(invalid("channel buffers must be at least 1"));
        }
        if config.heartbeat_interval_ms == 0 {
            return Err(invalid("HEARTBEAT_INTERVAL_MS must be positive"));
        }

        Ok(config)
    }
}
