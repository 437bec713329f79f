//! kalshiflow: real-time anomaly detection over a prediction-market trade feed
//!
//! - `streamer_core` - feed transport, message parsing, reconnect backoff
//! - `pipeline` - windows, baselines, scoring, clustering, alert gating, ingestion
//! - `notifier` - outbound alert delivery (Telegram or log)

pub mod notifier;
pub mod pipeline;
pub mod streamer_core;
