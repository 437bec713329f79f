//! Inbound feed configuration

use crate::pipeline::config::{env_lookup, read_var, ConfigError};

/// Where trades come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMode {
    /// Live websocket feed
    WebSocket(String),
    /// JSONL capture, one venue envelope per line
    Replay(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub url: Option<String>,
    /// Markets to subscribe to (empty = venue default)
    pub tickers: Vec<String>,
    /// Extra handshake headers, e.g. auth signatures
    pub headers: Vec<(String, String)>,
    pub replay_path: Option<String>,
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
    /// 0 = unlimited
    pub max_retries: u32,
}

impl FeedConfig {
    /// Environment variables:
    /// - `FEED_URL` (ws:// or wss://)
    /// - `FEED_TICKERS` (comma-separated)
    /// - `FEED_HEADERS` (`Name=Value;Name=Value`)
    /// - `FEED_REPLAY_PATH` (used when `FEED_URL` is unset)
    /// - `FEED_BACKOFF_INITIAL_SECS` (default: 1)
    /// - `FEED_BACKOFF_MAX_SECS` (default: 60)
    /// - `FEED_MAX_RETRIES` (default: 0, unlimited)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let url = non_empty("FEED_URL");
        if let Some(url) = &url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(ConfigError::InvalidValue(
                    "FEED_URL must start with ws:// or wss://".to_string(),
                ));
            }
        }

        let tickers = non_empty("FEED_TICKERS")
            .map(|raw| {
                raw.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let headers = match non_empty("FEED_HEADERS") {
            Some(raw) => parse_headers(&raw)?,
            None => Vec::new(),
        };

        let config = Self {
            url,
            tickers,
            headers,
            replay_path: non_empty("FEED_REPLAY_PATH"),
            backoff_initial_secs: read_var(lookup, "FEED_BACKOFF_INITIAL_SECS", 1)?,
            backoff_max_secs: read_var(lookup, "FEED_BACKOFF_MAX_SECS", 60)?,
            max_retries: read_var(lookup, "FEED_MAX_RETRIES", 0)?,
        };

        if config.backoff_initial_secs == 0 || config.backoff_initial_secs > config.backoff_max_secs {
            return Err(ConfigError::InvalidValue(
                "FEED_BACKOFF_INITIAL_SECS must be between 1 and FEED_BACKOFF_MAX_SECS".to_string(),
            ));
        }

        Ok(config)
    }

    /// Websocket wins over replay when both are set
    pub fn mode(&self) -> Result<FeedMode, ConfigError> {
        match (&self.url, &self.replay_path) {
            (Some(url), _) => Ok(FeedMode::WebSocket(url.clone())),
            (None, Some(path)) => Ok(FeedMode::Replay(path.clone())),
            (None, None) => Err(ConfigError::MissingVariable(
                "FEED_URL or FEED_REPLAY_PATH".to_string(),
            )),
        }
    }
}

fn parse_headers(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidValue(format!(
                "FEED_HEADERS entry {:?} is not Name=Value",
                pair
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_websocket_config() {
        let lookup = lookup_from(&[
            ("FEED_URL", "wss://api.elections.kalshi.com/trade-api/ws/v2"),
            ("FEED_TICKERS", "KXFED-25DEC, KXCPI-25NOV,,"),
            ("FEED_HEADERS", "KALSHI-ACCESS-KEY=abc; KALSHI-ACCESS-SIGNATURE=a=b"),
        ]);

        let config = FeedConfig::from_lookup(&lookup).unwrap();

        assert_eq!(config.tickers, vec!["KXFED-25DEC", "KXCPI-25NOV"]);
        assert_eq!(
            config.headers,
            vec![
                ("KALSHI-ACCESS-KEY".to_string(), "abc".to_string()),
                ("KALSHI-ACCESS-SIGNATURE".to_string(), "a=b".to_string()),
            ]
        );
        assert_eq!(config.backoff_initial_secs, 1);
        assert_eq!(config.backoff_max_secs, 60);
        assert!(matches!(config.mode().unwrap(), FeedMode::WebSocket(_)));
    }

    #[test]
    fn test_replay_mode() {
        let lookup = lookup_from(&[("FEED_REPLAY_PATH", "/tmp/trades.jsonl")]);
        let config = FeedConfig::from_lookup(&lookup).unwrap();
        assert_eq!(config.mode().unwrap(), FeedMode::Replay("/tmp/trades.jsonl".to_string()));
    }

    #[test]
    fn test_no_source_is_an_error() {
        let config = FeedConfig::from_lookup(&lookup_from(&[])).unwrap();
        assert!(matches!(config.mode(), Err(ConfigError::MissingVariable(_))));
    }

    #[test]
    fn test_rejects_http_url() {
        let lookup = lookup_from(&[("FEED_URL", "https://example.com")]);
        assert!(FeedConfig::from_lookup(&lookup).is_err());
    }

    #[test]
    fn test_rejects_malformed_header() {
        let lookup = lookup_from(&[("FEED_URL", "ws://localhost"), ("FEED_HEADERS", "novalue")]);
        assert!(FeedConfig::from_lookup(&lookup).is_err());
    }
}
