//! Venue message parsing
//!
//! Envelopes look like:
//!
//! ```json
//! {"type": "trade", "sid": 1, "msg": {"market_ticker": "KXFED-25DEC", "yes_price": 36,
//!   "no_price": 64, "count": 250, "ts": 1700000000, "taker_side": "no", "trade_id": "..."}}
//! ```
//!
//! Prices are integer cents. Control envelopes (`subscribed`, `ok`,
//! `unsubscribed`, `error`) and unknown types are not trades.

use crate::pipeline::types::{Side, TradeEvent};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {detail}")]
    InvalidField { field: &'static str, detail: String },
}

const CONTROL_TYPES: [&str; 4] = ["subscribed", "ok", "unsubscribed", "error"];

/// Outer frame, used to route on `type` before the payload is decoded
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    msg: Option<Value>,
}

/// Payload of a `trade` envelope
#[derive(Debug, Deserialize)]
struct TradeMsg {
    #[serde(default)]
    trade_id: Option<String>,
    #[serde(default)]
    market_ticker: Option<String>,
    #[serde(default, deserialize_with = "lenient_int")]
    yes_price: Option<LenientInt>,
    #[serde(default, deserialize_with = "lenient_int")]
    no_price: Option<LenientInt>,
    #[serde(default, deserialize_with = "lenient_int")]
    count: Option<LenientInt>,
    #[serde(default, deserialize_with = "lenient_int")]
    ts: Option<LenientInt>,
    #[serde(default)]
    taker_side: Option<String>,
}

/// Integer sent either as a JSON number or a numeric string. Anything else is
/// kept as `Invalid` so the rejection can name the field.
#[derive(Debug, Clone, PartialEq)]
enum LenientInt {
    Int(i64),
    Invalid(String),
}

fn lenient_int<'de, D>(deserializer: D) -> Result<Option<LenientInt>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.map(|value| match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => LenientInt::Int(i),
            None => LenientInt::Invalid(n.to_string()),
        },
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(i) => LenientInt::Int(i),
            Err(_) => LenientInt::Invalid(s),
        },
        other => LenientInt::Invalid(other.to_string()),
    }))
}

/// Parse one raw feed message
///
/// - `Ok(Some(trade))` for a well-formed trade
/// - `Ok(None)` for control or unrelated messages
/// - `Err(reason)` for malformed trades, which never reach the pipeline
pub fn parse_trade_message(text: &str) -> Result<Option<TradeEvent>, RejectReason> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| RejectReason::InvalidJson(e.to_string()))?;

    let kind = envelope.kind.as_deref().unwrap_or_default();
    if kind != "trade" {
        if CONTROL_TYPES.contains(&kind) {
            log::info!("📡 Feed control message: {}", text);
        } else {
            log::debug!("Ignoring feed message type {:?}", kind);
        }
        return Ok(None);
    }

    let msg = match envelope.msg {
        Some(msg @ Value::Object(_)) => msg,
        _ => return Err(RejectReason::MissingField("msg")),
    };
    let msg: TradeMsg = serde_json::from_value(msg).map_err(|e| invalid("msg", &e.to_string()))?;

    let ticker = msg
        .market_ticker
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(RejectReason::MissingField("market_ticker"))?;

    let count = int_field("count", msg.count)?.ok_or(RejectReason::MissingField("count"))?;
    let count = u64::try_from(count).map_err(|_| invalid("count", "negative"))?;

    let ts = int_field("ts", msg.ts)?.ok_or(RejectReason::MissingField("ts"))?;
    let occurred_at = Utc
        .timestamp_opt(ts, 0)
        .single()
        .filter(|_| ts >= 0)
        .ok_or_else(|| invalid("ts", "out of range"))?;

    let side = match msg.taker_side.as_deref() {
        Some(raw) => Side::parse(raw).ok_or_else(|| invalid("taker_side", raw))?,
        None => Side::Yes,
    };

    let yes_price = cents_field("yes_price", msg.yes_price)?;
    let no_price = cents_field("no_price", msg.no_price)?;
    let (yes_cents, no_cents) = match (yes_price, no_price) {
        (Some(yes), Some(no)) => (yes, no),
        (Some(yes), None) => (yes, 100 - yes),
        (None, Some(no)) => (100 - no, no),
        (None, None) => return Err(RejectReason::MissingField("yes_price")),
    };
    let taker_cents = match side {
        Side::Yes => yes_cents,
        Side::No => no_cents,
    };

    let trade_id = match msg.trade_id {
        Some(id) if !id.is_empty() => id,
        _ => format!("{}:{}:{}:{}:{}", ticker, ts, yes_cents, no_cents, count),
    };

    Ok(Some(TradeEvent {
        ticker: ticker.to_string(),
        trade_id,
        price: Decimal::new(taker_cents, 2),
        size: count,
        side,
        occurred_at,
    }))
}

fn invalid(field: &'static str, detail: &str) -> RejectReason {
    RejectReason::InvalidField {
        field,
        detail: detail.to_string(),
    }
}

fn int_field(field: &'static str, raw: Option<LenientInt>) -> Result<Option<i64>, RejectReason> {
    match raw {
        None => Ok(None),
        Some(LenientInt::Int(i)) => Ok(Some(i)),
        Some(LenientInt::Invalid(detail)) => Err(invalid(field, &detail)),
    }
}

fn cents_field(field: &'static str, raw: Option<LenientInt>) -> Result<Option<i64>, RejectReason> {
    match int_field(field, raw)? {
        Some(cents) if !(0..=100).contains(&cents) => Err(invalid(field, "outside 0-100 cents")),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_trade() {
        let raw = r#"{"type":"trade","sid":3,"msg":{"trade_id":"d91bc706","market_ticker":"KXFED-25DEC","yes_price":36,"no_price":64,"count":250,"taker_side":"no","ts":1700000000}}"#;

        let trade = parse_trade_message(raw).unwrap().unwrap();

        assert_eq!(trade.ticker, "KXFED-25DEC");
        assert_eq!(trade.trade_id, "d91bc706");
        assert_eq!(trade.side, Side::No);
        assert_eq!(trade.price, Decimal::new(64, 2));
        assert_eq!(trade.size, 250);
        assert_eq!(trade.occurred_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_synthesized_trade_id_and_default_side() {
        let raw = r#"{"type":"trade","msg":{"market_ticker":"KXCPI","yes_price":50,"no_price":50,"count":10,"ts":1700000001}}"#;

        let trade = parse_trade_message(raw).unwrap().unwrap();

        assert_eq!(trade.trade_id, "KXCPI:1700000001:50:50:10");
        assert_eq!(trade.side, Side::Yes);
        assert_eq!(trade.price, Decimal::new(50, 2));
    }

    #[test]
    fn test_missing_no_price_is_derived() {
        let raw = r#"{"type":"trade","msg":{"market_ticker":"KXCPI","yes_price":30,"count":"7","ts":"1700000001","taker_side":"no"}}"#;

        let trade = parse_trade_message(raw).unwrap().unwrap();
        assert_eq!(trade.price, Decimal::new(70, 2));
        assert_eq!(trade.size, 7);
    }

    #[test]
    fn test_control_messages_are_not_trades() {
        for raw in [
            r#"{"type":"subscribed","id":1,"msg":{"channel":"trade","sid":1}}"#,
            r#"{"type":"ok","id":2}"#,
            r#"{"type":"orderbook_delta","msg":{}}"#,
        ] {
            assert_eq!(parse_trade_message(raw), Ok(None));
        }
    }

    #[test]
    fn test_rejects_malformed_trades() {
        assert!(matches!(
            parse_trade_message("not json"),
            Err(RejectReason::InvalidJson(_))
        ));
        assert_eq!(
            parse_trade_message(r#"{"type":"trade","msg":{"yes_price":1,"count":1,"ts":1}}"#),
            Err(RejectReason::MissingField("market_ticker"))
        );
        assert_eq!(
            parse_trade_message(r#"{"type":"trade","msg":{"market_ticker":"A","yes_price":1,"ts":1}}"#),
            Err(RejectReason::MissingField("count"))
        );
        assert_eq!(
            parse_trade_message(r#"{"type":"trade","msg":{"market_ticker":"A","yes_price":1,"count":1}}"#),
            Err(RejectReason::MissingField("ts"))
        );
        assert!(matches!(
            parse_trade_message(r#"{"type":"trade","msg":{"market_ticker":"A","yes_price":1,"count":-5,"ts":1}}"#),
            Err(RejectReason::InvalidField { field: "count", .. })
        ));
        assert!(matches!(
            parse_trade_message(r#"{"type":"trade","msg":{"market_ticker":"A","yes_price":150,"count":5,"ts":1}}"#),
            Err(RejectReason::InvalidField { field: "yes_price", .. })
        ));
        assert!(matches!(
            parse_trade_message(r#"{"type":"trade","msg":{"market_ticker":"A","yes_price":1.5,"count":5,"ts":1}}"#),
            Err(RejectReason::InvalidField { field: "yes_price", .. })
        ));
        assert_eq!(
            parse_trade_message(r#"{"type":"trade","msg":{"market_ticker":"A","count":5,"ts":1}}"#),
            Err(RejectReason::MissingField("yes_price"))
        );
        assert!(matches!(
            parse_trade_message(r#"{"type":"trade","msg":{"market_ticker":"A","yes_price":1,"count":"lots","ts":1}}"#),
            Err(RejectReason::InvalidField { field: "count", .. })
        ));
        assert_eq!(
            parse_trade_message(r#"{"type":"trade","msg":"oops"}"#),
            Err(RejectReason::MissingField("msg"))
        );
        assert!(matches!(
            parse_trade_message(r#"{"type":"trade","msg":{"market_ticker":7,"yes_price":1,"count":5,"ts":1}}"#),
            Err(RejectReason::InvalidField { field: "msg", .. })
        ));
    }

    #[test]
    fn test_trade_payload_decodes_lenient_integers() {
        let msg: TradeMsg = serde_json::from_str(
            r#"{"market_ticker":"A","yes_price":" 42 ","no_price":null,"count":3,"ts":[1]}"#,
        )
        .unwrap();

        assert_eq!(msg.yes_price, Some(LenientInt::Int(42)));
        assert_eq!(msg.no_price, None);
        assert_eq!(msg.count, Some(LenientInt::Int(3)));
        assert_eq!(msg.ts, Some(LenientInt::Invalid("[1]".to_string())));
        assert_eq!(msg.trade_id, None);
    }
}
