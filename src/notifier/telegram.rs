//! Telegram Bot API delivery
//!
//! Endpoint: https://api.telegram.org/bot{token}/sendMessage

use super::{NotifyError, Notifier};
use crate::pipeline::config::env_lookup;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const SEND_TIMEOUT_SECS: u64 = 3;

pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`; None if either is missing
    pub fn from_env() -> Result<Option<Self>, NotifyError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, NotifyError> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        match (non_empty("TELEGRAM_BOT_TOKEN"), non_empty("TELEGRAM_CHAT_ID")) {
            (Some(token), Some(chat_id)) => Ok(Some(Self::new(&token, &chat_id)?)),
            _ => Ok(None),
        }
    }

    pub fn new(token: &str, chat_id: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("https://api.telegram.org/bot{}/sendMessage", token),
            chat_id: chat_id.to_string(),
        })
    }

    fn payload(&self, text: &str) -> Value {
        json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_text(&self, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.payload(text))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
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
    fn test_missing_credentials_yield_none() {
        assert!(TelegramNotifier::from_lookup(&lookup_from(&[])).unwrap().is_none());
        assert!(TelegramNotifier::from_lookup(&lookup_from(&[("TELEGRAM_BOT_TOKEN", "123:abc")]))
            .unwrap()
            .is_none());
        assert!(TelegramNotifier::from_lookup(&lookup_from(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", " "),
        ]))
        .unwrap()
        .is_none());
    }

    #[test]
    fn test_endpoint_and_payload() {
        let notifier = TelegramNotifier::from_lookup(&lookup_from(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "-100200"),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(notifier.endpoint, "https://api.telegram.org/bot123:abc/sendMessage");
        assert_eq!(notifier.name(), "telegram");

        let payload = notifier.payload("<b>hi</b>");
        assert_eq!(payload["chat_id"], "-100200");
        assert_eq!(payload["text"], "<b>hi</b>");
        assert_eq!(payload["parse_mode"], "HTML");
    }
}
