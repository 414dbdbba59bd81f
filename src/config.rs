use anyhow::{Context, Result};

use crate::projector::{normalize_grouping, MAX_DISPLAY_ROWS, MIN_DISPLAY_ROWS};

#[derive(Debug, Clone)]
pub struct Config {
    pub symbol: String,
    pub rest_base_url: String,
    pub ws_base_url: String,
    pub request_timeout_ms: u64,
    pub snapshot_depth_limit: usize,
    pub diff_interval_ms: u64,
    pub display_rows: usize,
    pub grouping_multiplier: u32,
    pub projection_interval_ms: u64,
    pub snapshot_retry_delay_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub trade_feed_capacity: usize,
    pub trade_flash_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            rest_base_url: "https://api.binance.com".to_string(),
            ws_base_url: "wss://stream.binance.com:9443".to_string(),
            request_timeout_ms: 10_000,
            snapshot_depth_limit: 1_000,
            diff_interval_ms: 100,
            display_rows: 20,
            grouping_multiplier: 1,
            projection_interval_ms: 250,
            snapshot_retry_delay_ms: 800,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            trade_feed_capacity: 50,
            trade_flash_ms: 300,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let symbol = std::env::var("SYMBOL")
            .unwrap_or(defaults.symbol)
            .trim()
            .to_ascii_uppercase();

        let rest_base_url = std::env::var("REST_BASE_URL")
            .unwrap_or(defaults.rest_base_url)
            .trim()
            .trim_end_matches('/')
            .to_string();

        let ws_base_url = std::env::var("WS_BASE_URL")
            .unwrap_or(defaults.ws_base_url)
            .trim()
            .trim_end_matches('/')
            .to_string();

        let config = Self {
            symbol,
            rest_base_url,
            ws_base_url,
            request_timeout_ms: env_u64("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms)?,
            snapshot_depth_limit: env_usize("SNAPSHOT_DEPTH_LIMIT", defaults.snapshot_depth_limit)?,
            diff_interval_ms: env_u64("DIFF_INTERVAL_MS", defaults.diff_interval_ms)?,
            display_rows: env_usize("DISPLAY_ROWS", defaults.display_rows)?
                .clamp(MIN_DISPLAY_ROWS, MAX_DISPLAY_ROWS),
            grouping_multiplier: normalize_grouping(env_u32(
                "GROUPING_MULTIPLIER",
                defaults.grouping_multiplier,
            )?),
            projection_interval_ms: env_u64(
                "PROJECTION_INTERVAL_MS",
                defaults.projection_interval_ms,
            )?,
            snapshot_retry_delay_ms: env_u64(
                "SNAPSHOT_RETRY_DELAY_MS",
                defaults.snapshot_retry_delay_ms,
            )?,
            reconnect_base_delay_ms: env_u64(
                "RECONNECT_BASE_DELAY_MS",
                defaults.reconnect_base_delay_ms,
            )?,
            reconnect_max_delay_ms: env_u64(
                "RECONNECT_MAX_DELAY_MS",
                defaults.reconnect_max_delay_ms,
            )?,
            trade_feed_capacity: defaults.trade_feed_capacity,
            trade_flash_ms: defaults.trade_flash_ms,
        };

        if config.symbol.is_empty() {
            anyhow::bail!("SYMBOL cannot be empty");
        }

        Ok(config)
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {name} value: {value}")),
        Err(_) => Ok(default),
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u32>()
            .with_context(|| format!("invalid {name} value: {value}")),
        Err(_) => Ok(default),
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid {name} value: {value}")),
        Err(_) => Ok(default),
    }
}
