use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::{
    errors::FeedError,
    wire::{parse_decimal_lossy, parse_level_array, parse_u64_lossy},
};

/// Full-state baseline of the book tagged with the exchange sequence id.
#[derive(Debug, Clone)]
pub struct DepthSnapshot {
    pub sequence_id: u64,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

/// Price tick and quantity lot step for a symbol, used to derive display
/// precision and the projector's grouping step.
#[derive(Debug, Clone)]
pub struct SymbolMeta {
    pub tick_size: Decimal,
    pub lot_step: Decimal,
}

/// Seam for the snapshot/metadata REST contract. The stream driver only
/// talks to this trait; tests substitute scripted sources.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        depth_limit: usize,
    ) -> Result<DepthSnapshot, FeedError>;

    async fn fetch_symbol_meta(&self, symbol: &str) -> Result<SymbolMeta, FeedError>;
}

pub struct RestSnapshotSource {
    http_client: reqwest::Client,
    base_url: String,
}

impl RestSnapshotSource {
    pub fn new(base_url: String, timeout_ms: u64) -> Result<Self, FeedError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| FeedError::Network(format!("failed to build reqwest client: {err}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: String) -> Result<Value, FeedError> {
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|err| FeedError::Network(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| FeedError::Network(err.to_string()))?;

        if status != StatusCode::OK {
            return Err(FeedError::Network(format!(
                "status={status} url={url} body={}",
                truncate(&body, 240)
            )));
        }

        serde_json::from_str::<Value>(&body)
            .map_err(|err| FeedError::Parse(format!("{err}; body={}", truncate(&body, 240))))
    }
}

#[async_trait]
impl SnapshotSource for RestSnapshotSource {
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        depth_limit: usize,
    ) -> Result<DepthSnapshot, FeedError> {
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.base_url,
            symbol.to_ascii_uppercase(),
            depth_limit
        );
        let value = self.get_json(url).await?;
        parse_depth_snapshot(&value)
    }

    async fn fetch_symbol_meta(&self, symbol: &str) -> Result<SymbolMeta, FeedError> {
        let url = format!(
            "{}/api/v3/exchangeInfo?symbol={}",
            self.base_url,
            symbol.to_ascii_uppercase()
        );
        let value = self.get_json(url).await?;
        parse_symbol_meta(&value)
    }
}

pub fn parse_depth_snapshot(value: &Value) -> Result<DepthSnapshot, FeedError> {
    let sequence_id = value
        .get("lastUpdateId")
        .and_then(parse_u64_lossy)
        .ok_or_else(|| FeedError::Parse("snapshot missing lastUpdateId".to_string()))?;

    let bids = value
        .get("bids")
        .map(parse_level_array)
        .ok_or_else(|| FeedError::Parse("snapshot missing bids".to_string()))?;
    let asks = value
        .get("asks")
        .map(parse_level_array)
        .ok_or_else(|| FeedError::Parse("snapshot missing asks".to_string()))?;

    Ok(DepthSnapshot {
        sequence_id,
        bids,
        asks,
    })
}

pub fn parse_symbol_meta(value: &Value) -> Result<SymbolMeta, FeedError> {
    let symbols = value
        .get("symbols")
        .and_then(Value::as_array)
        .ok_or_else(|| FeedError::Parse("exchange info missing symbols".to_string()))?;
    let entry = symbols
        .first()
        .ok_or_else(|| FeedError::Parse("exchange info has no symbol entry".to_string()))?;
    let filters = entry
        .get("filters")
        .and_then(Value::as_array)
        .ok_or_else(|| FeedError::Parse("symbol entry missing filters".to_string()))?;

    let mut tick_size = None;
    let mut lot_step = None;
    for filter in filters {
        match filter.get("filterType").and_then(Value::as_str) {
            Some("PRICE_FILTER") => {
                tick_size = filter.get("tickSize").and_then(parse_decimal_lossy);
            }
            Some("LOT_SIZE") => {
                lot_step = filter.get("stepSize").and_then(parse_decimal_lossy);
            }
            _ => {}
        }
    }

    let tick_size = tick_size
        .filter(|tick| !tick.is_zero())
        .ok_or_else(|| FeedError::Parse("missing or zero PRICE_FILTER.tickSize".to_string()))?;
    let lot_step = lot_step
        .filter(|step| !step.is_zero())
        .ok_or_else(|| FeedError::Parse("missing or zero LOT_SIZE.stepSize".to_string()))?;

    Ok(SymbolMeta {
        tick_size,
        lot_step,
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect::<String>() + "…"
}
