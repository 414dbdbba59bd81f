use rust_decimal::Decimal;
use serde_json::Value;

use crate::{errors::FeedError, sequencer::DiffEvent, trades::TradeEvent};

/// Last known top-of-book from the independent, lower-detail feed. Used only
/// as a fallback when the reconstructed book cannot produce a sane spread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestQuote {
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
}

impl BestQuote {
    pub fn is_sane(&self) -> bool {
        self.ask_price > self.bid_price && self.bid_price > Decimal::ZERO
    }
}

/// Parses a diff-channel payload. `Ok(None)` means the message is valid JSON
/// but not a depth update (subscribe acks and the like); `Err` means a
/// malformed message that should be dropped while the stream continues.
pub fn parse_diff_message(payload: &str) -> Result<Option<DiffEvent>, FeedError> {
    let value = serde_json::from_str::<Value>(payload)
        .map_err(|err| FeedError::Parse(format!("diff payload: {err}")))?;
    let data = value.get("data").unwrap_or(&value);

    if data.get("e").and_then(Value::as_str) != Some("depthUpdate") {
        return Ok(None);
    }

    let first_update_id = data
        .get("U")
        .and_then(parse_u64_lossy)
        .ok_or_else(|| FeedError::Parse("depth update missing U".to_string()))?;
    let final_update_id = data
        .get("u")
        .and_then(parse_u64_lossy)
        .ok_or_else(|| FeedError::Parse("depth update missing u".to_string()))?;

    if final_update_id < first_update_id {
        return Err(FeedError::Parse(format!(
            "depth update with u={final_update_id} < U={first_update_id}"
        )));
    }

    let bid_changes = data.get("b").map(parse_level_array).unwrap_or_default();
    let ask_changes = data.get("a").map(parse_level_array).unwrap_or_default();

    Ok(Some(DiffEvent {
        first_update_id,
        final_update_id,
        bid_changes,
        ask_changes,
    }))
}

/// Parses a trade-channel payload into a single executed trade.
pub fn parse_trade_message(payload: &str) -> Result<Option<TradeEvent>, FeedError> {
    let value = serde_json::from_str::<Value>(payload)
        .map_err(|err| FeedError::Parse(format!("trade payload: {err}")))?;
    let data = value.get("data").unwrap_or(&value);

    if data.get("e").and_then(Value::as_str) != Some("trade") {
        return Ok(None);
    }

    let id = data
        .get("t")
        .and_then(parse_u64_lossy)
        .ok_or_else(|| FeedError::Parse("trade missing id".to_string()))?;
    let price = data
        .get("p")
        .and_then(parse_decimal_lossy)
        .ok_or_else(|| FeedError::Parse("trade missing price".to_string()))?;
    let quantity = data
        .get("q")
        .and_then(parse_decimal_lossy)
        .ok_or_else(|| FeedError::Parse("trade missing quantity".to_string()))?;
    let timestamp = data
        .get("T")
        .or_else(|| data.get("E"))
        .and_then(parse_u64_lossy)
        .ok_or_else(|| FeedError::Parse("trade missing timestamp".to_string()))?;

    // `m` is true when the buyer is the resting maker, so the aggressor sold.
    let aggressive_buy = !data.get("m").and_then(Value::as_bool).unwrap_or(false);

    Ok(Some(TradeEvent {
        id,
        price,
        quantity,
        timestamp,
        aggressive_buy,
    }))
}

/// Parses a best-quote (book ticker) payload. The raw stream carries no
/// event marker; the four quote fields identify it.
pub fn parse_best_quote_message(payload: &str) -> Result<Option<BestQuote>, FeedError> {
    let value = serde_json::from_str::<Value>(payload)
        .map_err(|err| FeedError::Parse(format!("quote payload: {err}")))?;
    let data = value.get("data").unwrap_or(&value);

    let (Some(bid), Some(ask)) = (data.get("b"), data.get("a")) else {
        return Ok(None);
    };
    if data.get("B").is_none() || data.get("A").is_none() {
        return Ok(None);
    }

    let bid_price = parse_decimal_lossy(bid)
        .ok_or_else(|| FeedError::Parse("quote with unparsable bid price".to_string()))?;
    let ask_price = parse_decimal_lossy(ask)
        .ok_or_else(|| FeedError::Parse("quote with unparsable ask price".to_string()))?;
    let bid_qty = data
        .get("B")
        .and_then(parse_decimal_lossy)
        .ok_or_else(|| FeedError::Parse("quote with unparsable bid qty".to_string()))?;
    let ask_qty = data
        .get("A")
        .and_then(parse_decimal_lossy)
        .ok_or_else(|| FeedError::Parse("quote with unparsable ask qty".to_string()))?;

    Ok(Some(BestQuote {
        bid_price,
        bid_qty,
        ask_price,
        ask_qty,
    }))
}

pub fn parse_level_array(value: &Value) -> Vec<(Decimal, Decimal)> {
    let Some(rows) = value.as_array() else {
        return Vec::new();
    };

    let mut parsed = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(row) = row.as_array() else {
            continue;
        };
        if row.len() < 2 {
            continue;
        }

        let Some(price) = row.first().and_then(parse_decimal_lossy) else {
            continue;
        };
        let Some(qty) = row.get(1).and_then(parse_decimal_lossy) else {
            continue;
        };
        parsed.push((price, qty));
    }

    parsed
}

pub fn parse_u64_lossy(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| {
            value
                .as_i64()
                .and_then(|numeric| (numeric >= 0).then_some(numeric as u64))
        })
        .or_else(|| value.as_str().and_then(|text| text.parse::<u64>().ok()))
}

pub fn parse_decimal_lossy(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(text) => text.trim().parse::<Decimal>().ok(),
        Value::Number(number) => number.to_string().parse::<Decimal>().ok(),
        _ => None,
    }
}

pub fn build_diff_stream_url(ws_base_url: &str, symbol: &str, interval_ms: u64) -> String {
    let suffix = if interval_ms == 100 { "@100ms" } else { "" };
    format!(
        "{}/ws/{}@depth{}",
        ws_base_url.trim_end_matches('/'),
        symbol.to_ascii_lowercase(),
        suffix
    )
}

pub fn build_trade_stream_url(ws_base_url: &str, symbol: &str) -> String {
    format!(
        "{}/ws/{}@trade",
        ws_base_url.trim_end_matches('/'),
        symbol.to_ascii_lowercase()
    )
}

pub fn build_best_quote_stream_url(ws_base_url: &str, symbol: &str) -> String {
    format!(
        "{}/ws/{}@bookTicker",
        ws_base_url.trim_end_matches('/'),
        symbol.to_ascii_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parse_diff_message_maps_update_ids_and_changes() {
        let payload = r#"{
            "e": "depthUpdate",
            "E": 1700000000001,
            "s": "BTCUSDT",
            "U": 157,
            "u": 160,
            "b": [["99.50", "2"]],
            "a": [["101.00", "0"]]
        }"#;

        let diff = parse_diff_message(payload)
            .expect("payload should parse")
            .expect("payload should be a depth update");
        assert_eq!(diff.first_update_id, 157);
        assert_eq!(diff.final_update_id, 160);
        assert_eq!(diff.bid_changes, vec![(dec!(99.50), dec!(2))]);
        assert_eq!(diff.ask_changes, vec![(dec!(101.00), dec!(0))]);
    }

    #[test]
    fn parse_diff_message_unwraps_combined_stream_envelope() {
        let payload = r#"{
            "stream": "btcusdt@depth@100ms",
            "data": { "e": "depthUpdate", "U": 5, "u": 6, "b": [], "a": [] }
        }"#;

        let diff = parse_diff_message(payload)
            .expect("payload should parse")
            .expect("payload should be a depth update");
        assert_eq!(diff.first_update_id, 5);
    }

    #[test]
    fn parse_diff_message_ignores_foreign_events() {
        let payload = r#"{ "result": null, "id": 1 }"#;
        assert!(parse_diff_message(payload)
            .expect("payload should parse")
            .is_none());
    }

    #[test]
    fn parse_diff_message_rejects_missing_ids() {
        let payload = r#"{ "e": "depthUpdate", "u": 6, "b": [], "a": [] }"#;
        assert!(parse_diff_message(payload).is_err());
    }

    #[test]
    fn parse_trade_message_maps_aggressor_side() {
        let payload = r#"{
            "e": "trade",
            "E": 1700000000001,
            "T": 1700000000000,
            "s": "BTCUSDT",
            "t": 123456,
            "p": "100.5",
            "q": "0.25",
            "m": true
        }"#;

        let trade = parse_trade_message(payload)
            .expect("payload should parse")
            .expect("payload should be a trade");
        assert_eq!(trade.id, 123456);
        assert_eq!(trade.price, dec!(100.5));
        assert_eq!(trade.quantity, dec!(0.25));
        assert_eq!(trade.timestamp, 1700000000000);
        assert!(!trade.aggressive_buy);
    }

    #[test]
    fn parse_best_quote_message_maps_quote_fields() {
        let payload = r#"{
            "u": 400900217,
            "s": "BTCUSDT",
            "b": "100.00",
            "B": "31.21",
            "a": "100.05",
            "A": "40.66"
        }"#;

        let quote = parse_best_quote_message(payload)
            .expect("payload should parse")
            .expect("payload should be a quote");
        assert_eq!(quote.bid_price, dec!(100.00));
        assert_eq!(quote.ask_qty, dec!(40.66));
        assert!(quote.is_sane());
    }

    #[test]
    fn best_quote_sanity_requires_positive_uncrossed_prices() {
        let crossed = BestQuote {
            bid_price: dec!(100.05),
            bid_qty: dec!(1),
            ask_price: dec!(100.00),
            ask_qty: dec!(1),
        };
        assert!(!crossed.is_sane());
    }

    #[test]
    fn stream_urls_lowercase_the_symbol() {
        assert_eq!(
            build_diff_stream_url("wss://stream.example.com", "BTCUSDT", 100),
            "wss://stream.example.com/ws/btcusdt@depth@100ms"
        );
        assert_eq!(
            build_diff_stream_url("wss://stream.example.com/", "BTCUSDT", 1000),
            "wss://stream.example.com/ws/btcusdt@depth"
        );
        assert_eq!(
            build_trade_stream_url("wss://stream.example.com", "ETHUSDT"),
            "wss://stream.example.com/ws/ethusdt@trade"
        );
        assert_eq!(
            build_best_quote_stream_url("wss://stream.example.com", "ETHUSDT"),
            "wss://stream.example.com/ws/ethusdt@bookTicker"
        );
    }
}
