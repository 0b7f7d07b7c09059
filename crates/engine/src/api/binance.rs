//! Binance public API client for market data (no authentication required)

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::analysis::CandleSource;
use crate::error::AnalysisError;
use crate::types::{Candle, CandleSeries};

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: u32 = 1000;

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

/// Raw kline data from Binance API (array of arrays)
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

impl RawKline {
    fn close_time(&self) -> i64 {
        self.6
    }

    /// `None` if any numeric field fails to parse
    fn to_candle(&self) -> Option<Candle> {
        Some(Candle {
            timestamp: self.0,
            open: self.1.parse().ok()?,
            high: self.2.parse().ok()?,
            low: self.3.parse().ok()?,
            close: self.4.parse().ok()?,
            volume: self.5.parse().ok()?,
        })
    }
}

/// Length of one Binance kline interval in milliseconds
pub fn interval_millis(interval: &str) -> Option<i64> {
    const MINUTE: i64 = 60_000;
    let millis = match interval {
        "1m" => MINUTE,
        "3m" => 3 * MINUTE,
        "5m" => 5 * MINUTE,
        "15m" => 15 * MINUTE,
        "30m" => 30 * MINUTE,
        "1h" => 60 * MINUTE,
        "2h" => 120 * MINUTE,
        "4h" => 240 * MINUTE,
        "6h" => 360 * MINUTE,
        "8h" => 480 * MINUTE,
        "12h" => 720 * MINUTE,
        "1d" => 1_440 * MINUTE,
        "3d" => 4_320 * MINUTE,
        "1w" => 10_080 * MINUTE,
        _ => return None,
    };
    Some(millis)
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceClient {
    /// Create a new Binance client with default base URL
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn get_raw_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<RawKline>> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}",
            self.base_url, symbol, interval
        );

        if let Some(start) = start_time {
            url.push_str(&format!("&startTime={}", start));
        }
        if let Some(end) = end_time {
            url.push_str(&format!("&endTime={}", end));
        }

        let limit = limit.unwrap_or(500).min(MAX_KLINES_PER_REQUEST);
        url.push_str(&format!("&limit={}", limit));

        debug!(symbol, interval, "Fetching klines from Binance");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        Ok(response.json().await?)
    }

    /// Fetch candles for a symbol (single request, at most 1000 rows)
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>> {
        let raw = self
            .get_raw_klines(symbol, interval, start_time, end_time, limit)
            .await?;
        let candles: Vec<Candle> = raw.iter().filter_map(RawKline::to_candle).collect();
        debug!(count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    /// Fetch candles with automatic pagination for ranges > 1000 bars
    pub async fn get_klines_paginated(
        &self,
        symbol: &str,
        interval: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<Candle>> {
        let mut all_candles = Vec::new();
        let mut current_start = start_time;

        info!(symbol, interval, "Fetching paginated klines from Binance");

        loop {
            if current_start >= end_time {
                break;
            }

            let raw = self
                .get_raw_klines(
                    symbol,
                    interval,
                    Some(current_start),
                    Some(end_time),
                    Some(MAX_KLINES_PER_REQUEST),
                )
                .await?;

            let Some(last_close_time) = raw.last().map(RawKline::close_time) else {
                break;
            };
            all_candles.extend(raw.iter().filter_map(RawKline::to_candle));

            // Move start to after the last candle
            current_start = last_close_time + 1;

            // Small delay to respect rate limits
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        info!(total = all_candles.len(), "Paginated kline fetch complete");
        Ok(all_candles)
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    async fn fetch_series(
        &self,
        symbol: &str,
        timeframe: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<CandleSeries, AnalysisError> {
        if interval_millis(timeframe).is_none() {
            return Err(AnalysisError::InvalidConfig(format!(
                "unsupported timeframe '{timeframe}'"
            )));
        }
        let candles = self
            .get_klines_paginated(symbol, timeframe, start_time, end_time)
            .await
            .map_err(AnalysisError::fetch)?;
        Ok(CandleSeries::new(symbol, timeframe, candles)?)
    }
}
