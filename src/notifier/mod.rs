//! Outbound alert delivery
//!
//! Alerts leave the pipeline through a bounded queue and are delivered here,
//! one at a time, best effort. A failed delivery is logged and counted; the
//! dispatcher's cooldown and daily cap are not refunded.

pub mod telegram;

use crate::pipeline::types::{Alert, AlertClass};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub use telegram::TelegramNotifier;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Notification rejected ({status}): {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a pre-rendered message (startup notices, etc.)
    async fn send_text(&self, text: &str) -> Result<(), NotifyError>;

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.send_text(&render_alert(alert)).await
    }

    fn name(&self) -> &'static str;
}

/// Fallback when no delivery credentials are configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_text(&self, text: &str) -> Result<(), NotifyError> {
        log::info!("📣 {}", text.replace('\n', " | "));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Render an alert as Telegram-flavoured HTML
pub fn render_alert(alert: &Alert) -> String {
    match alert.class {
        AlertClass::Solo => {
            let ticker = alert.tickers.first().map(String::as_str).unwrap_or_default();
            format!(
                "🚨 <b>SOLO EXTREME {:.0}</b>\n<a href='https://kalshi.com/markets/{}'>{}</a>\n{}",
                alert.score,
                escape_html(ticker),
                escape_html(ticker),
                escape_html(&alert.summary)
            )
        }
        AlertClass::Cluster => {
            let lines: Vec<String> = alert
                .tickers
                .iter()
                .map(|t| format!("- {}", escape_html(t)))
                .collect();
            format!(
                "🔥 <b>CLUSTER ({} mkts)</b>\nMax Score: {:.0}\nTickers:\n{}",
                alert.tickers.len(),
                alert.score,
                lines.join("\n")
            )
        }
        AlertClass::Debug => format!(
            "🧪 <b>TRADE (debug)</b>\n{}\nTime: {}",
            escape_html(&alert.summary),
            alert.at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub delivered: u64,
    pub failed: u64,
}

/// Drain the alert queue into the notifier until every sender is dropped
pub async fn start_alert_delivery(
    mut rx: mpsc::Receiver<Alert>,
    notifier: Arc<dyn Notifier>,
) -> DeliverySummary {
    log::info!("📬 Alert delivery started ({})", notifier.name());
    let mut summary = DeliverySummary::default();

    while let Some(alert) = rx.recv().await {
        match notifier.send(&alert).await {
            Ok(()) => {
                summary.delivered += 1;
                log::info!(
                    "🚨 {} alert sent via {}: {}",
                    alert.class.as_str(),
                    notifier.name(),
                    alert.summary
                );
            }
            Err(e) => {
                summary.failed += 1;
                log::warn!(
                    "⚠️  {} alert for {} not delivered: {}",
                    alert.class.as_str(),
                    alert.tickers.join(","),
                    e
                );
            }
        }
    }

    log::info!(
        "✅ Alert delivery stopped: {} delivered, {} failed",
        summary.delivered,
        summary.failed
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    /// Records every message; fails those containing "FAIL"
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_text(&self, text: &str) -> Result<(), NotifyError> {
            if text.contains("FAIL") {
                return Err(NotifyError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn alert(class: AlertClass, tickers: &[&str], summary: &str) -> Alert {
        Alert {
            class,
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
            score: 91.4,
            at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            summary: summary.to_string(),
        }
    }

    #[test]
    fn test_render_solo() {
        let text = render_alert(&alert(AlertClass::Solo, &["KXFED-25DEC"], "size_z=30.0 <big>"));
        assert!(text.starts_with("🚨 <b>SOLO EXTREME 91</b>"));
        assert!(text.contains("https://kalshi.com/markets/KXFED-25DEC"));
        assert!(text.contains("size_z=30.0 &lt;big&gt;"));
    }

    #[test]
    fn test_render_cluster() {
        let text = render_alert(&alert(AlertClass::Cluster, &["KXA", "KXB"], ""));
        assert!(text.contains("CLUSTER (2 mkts)"));
        assert!(text.ends_with("- KXA\n- KXB"));
    }

    #[test]
    fn test_render_debug() {
        let text = render_alert(&alert(AlertClass::Debug, &["KXA"], "[debug] KXA"));
        assert!(text.contains("TRADE (debug)"));
        assert!(text.contains("2023-11-14 22:13:20 UTC"));
    }

    #[tokio::test]
    async fn test_delivery_drains_queue_and_counts_failures() {
        let (tx, rx) = mpsc::channel(8);
        let notifier = Arc::new(RecordingNotifier::default());

        tx.send(alert(AlertClass::Solo, &["KXA"], "one")).await.unwrap();
        tx.send(alert(AlertClass::Solo, &["KXB"], "FAIL")).await.unwrap();
        tx.send(alert(AlertClass::Cluster, &["KXA", "KXB"], "three")).await.unwrap();
        drop(tx);

        let summary = start_alert_delivery(rx, notifier.clone()).await;

        assert_eq!(summary, DeliverySummary { delivered: 2, failed: 1 });
        assert_eq!(notifier.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.send(&alert(AlertClass::Debug, &["KXA"], "x")).await.is_ok());
        assert_eq!(LogNotifier.name(), "log");
    }
}
