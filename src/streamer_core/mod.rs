pub mod config;
pub mod error_handler;
pub mod feed;
pub mod parser;

pub use config::{FeedConfig, FeedMode};
pub use error_handler::ExponentialBackoff;
pub use feed::{run_feed, FeedError, FeedStats, ReplaySource, TradeSource, WsSource};
pub use parser::{parse_trade_message, RejectReason};
