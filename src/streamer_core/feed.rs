//! Inbound trade feed: sources, reconnect loop, counters
//!
//! A `TradeSource` yields raw venue messages. `run_feed` turns them into
//! `TradeEvent`s, pushes them into the bounded trade channel (waiting for
//! capacity), and reconnects with capped exponential backoff when the transport
//! fails. A source that ends cleanly (replay EOF) ends the feed.

use super::error_handler::{ExponentialBackoff, MaxRetriesExceeded};
use super::parser::parse_trade_message;
use crate::pipeline::types::TradeEvent;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid feed request: {0}")]
    Request(String),
    #[error("Connection closed by server")]
    Closed,
    #[error("Trade channel closed")]
    ChannelClosed,
    #[error(transparent)]
    RetriesExhausted(#[from] MaxRetriesExceeded),
}

#[async_trait]
pub trait TradeSource: Send {
    /// Next raw message; Ok(None) when the source is exhausted
    async fn next_message(&mut self) -> Result<Option<String>, FeedError>;

    fn describe(&self) -> String;
}

/// JSONL capture replay, one envelope per line
pub struct ReplaySource {
    path: String,
    lines: Lines<BufReader<File>>,
}

impl ReplaySource {
    pub async fn open(path: &str) -> Result<Self, FeedError> {
        let file = File::open(path).await?;
        Ok(Self {
            path: path.to_string(),
            lines: BufReader::new(file).lines(),
        })
    }
}

#[async_trait]
impl TradeSource for ReplaySource {
    async fn next_message(&mut self) -> Result<Option<String>, FeedError> {
        while let Some(line) = self.lines.next_line().await? {
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("replay:{}", self.path)
    }
}

/// Live websocket connection subscribed to the trade channel
pub struct WsSource {
    url: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsSource {
    pub async fn connect(
        url: &str,
        headers: &[(String, String)],
        tickers: &[String],
    ) -> Result<Self, FeedError> {
        let mut request = url.into_client_request()?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FeedError::Request(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FeedError::Request(format!("header {}: {}", name, e)))?;
            request.headers_mut().insert(name, value);
        }

        let (mut stream, _response) = connect_async(request).await?;
        log::info!("🔌 Connected WS: {}", url);

        stream
            .send(Message::Text(subscribe_command(1, tickers).to_string().into()))
            .await?;
        log::info!("📨 Subscribed to trade channel ({} tickers)", tickers.len());

        Ok(Self {
            url: url.to_string(),
            stream,
        })
    }
}

pub fn subscribe_command(id: u64, tickers: &[String]) -> serde_json::Value {
    let mut params = json!({ "channels": ["trade"] });
    if !tickers.is_empty() {
        params["market_tickers"] = json!(tickers);
    }
    json!({ "id": id, "cmd": "subscribe", "params": params })
}

#[async_trait]
impl TradeSource for WsSource {
    async fn next_message(&mut self) -> Result<Option<String>, FeedError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => log::warn!("⚠️  Non-UTF8 binary frame ignored"),
                },
                Some(Ok(Message::Ping(data))) => {
                    self.stream.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    log::warn!("⚠️  Server closed connection: {:?}", frame);
                    return Err(FeedError::Closed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(FeedError::Closed),
            }
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Feed counters, shared with the runtime for logging
#[derive(Debug, Default)]
pub struct FeedStats {
    pub messages: AtomicU64,
    pub trades: AtomicU64,
    pub control: AtomicU64,
    pub rejected: AtomicU64,
    pub reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStatsSnapshot {
    pub messages: u64,
    pub trades: u64,
    pub control: u64,
    pub rejected: u64,
    pub reconnects: u64,
}

impl FeedStats {
    pub fn snapshot(&self) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            trades: self.trades.load(Ordering::Relaxed),
            control: self.control.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Connect, pump, reconnect
///
/// Returns Ok(()) when a source is exhausted, `ChannelClosed` if the pipeline
/// went away, or `RetriesExhausted` once the backoff gives up.
pub async fn run_feed<F, Fut>(
    mut connect: F,
    tx: mpsc::Sender<TradeEvent>,
    mut backoff: ExponentialBackoff,
    stats: Arc<FeedStats>,
) -> Result<(), FeedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Box<dyn TradeSource>, FeedError>>,
{
    let mut connected_once = false;

    loop {
        match connect().await {
            Ok(mut source) => {
                if connected_once {
                    stats.reconnects.fetch_add(1, Ordering::Relaxed);
                }
                connected_once = true;
                log::info!("✅ Feed connected: {}", source.describe());
                backoff.reset();

                match pump(source.as_mut(), &tx, &stats).await {
                    Ok(()) => {
                        log::info!("✅ Feed exhausted: {}", source.describe());
                        return Ok(());
                    }
                    Err(FeedError::ChannelClosed) => return Err(FeedError::ChannelClosed),
                    Err(e) => {
                        log::error!("❌ Feed error: {}", e);
                        backoff.sleep().await?;
                    }
                }
            }
            Err(e) => {
                log::error!("❌ Feed connection failed: {}", e);
                backoff.sleep().await?;
            }
        }
    }
}

async fn pump(
    source: &mut dyn TradeSource,
    tx: &mpsc::Sender<TradeEvent>,
    stats: &FeedStats,
) -> Result<(), FeedError> {
    while let Some(text) = source.next_message().await? {
        stats.messages.fetch_add(1, Ordering::Relaxed);

        match parse_trade_message(&text) {
            Ok(Some(trade)) => {
                tx.send(trade).await.map_err(|_| FeedError::ChannelClosed)?;
                stats.trades.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => {
                stats.control.fetch_add(1, Ordering::Relaxed);
            }
            Err(reason) => {
                stats.rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!("⚠️  Rejected feed message ({}): {}", reason, truncate(&text, 200));
            }
        }
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
