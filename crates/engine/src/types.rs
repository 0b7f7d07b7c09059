//! Core market-data types for the discovery engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single OHLCV candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in milliseconds since the Unix epoch
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trade direction an entry (or pattern) is evaluated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Reasons a raw candle sequence is rejected at the data boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeriesError {
    #[error("timestamp at index {index} is not strictly greater than its predecessor")]
    NonMonotonicTimestamp { index: usize },

    #[error("non-positive or non-finite price at index {index}")]
    InvalidPrice { index: usize },

    #[error("high/low range does not contain open and close at index {index}")]
    InvertedRange { index: usize },

    #[error("negative or non-finite volume at index {index}")]
    NegativeVolume { index: usize },
}

/// Time-ordered candles for one symbol and timeframe.
///
/// Only constructible through [`CandleSeries::new`], so every series that reaches
/// the analysis pipeline is strictly increasing by timestamp and has sane OHLCV
/// values. Read-only after construction.
#[derive(Debug, Clone, Serialize)]
pub struct CandleSeries {
    symbol: String,
    timeframe: String,
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Validate and wrap a candle sequence
    pub fn new(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        candles: Vec<Candle>,
    ) -> Result<Self, SeriesError> {
        for (index, candle) in candles.iter().enumerate() {
            validate_candle(index, candle)?;
            if index > 0 && candle.timestamp <= candles[index - 1].timestamp {
                return Err(SeriesError::NonMonotonicTimestamp { index });
            }
        }

        Ok(Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            candles,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    /// First and last candle timestamps, if any
    pub fn time_range(&self) -> Option<(i64, i64)> {
        match (self.candles.first(), self.candles.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }
}

fn validate_candle(index: usize, candle: &Candle) -> Result<(), SeriesError> {
    let prices = [candle.open, candle.high, candle.low, candle.close];
    if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err(SeriesError::InvalidPrice { index });
    }
    if candle.low > candle.high
        || candle.open < candle.low
        || candle.open > candle.high
        || candle.close < candle.low
        || candle.close > candle.high
    {
        return Err(SeriesError::InvertedRange { index });
    }
    if !candle.volume.is_finite() || candle.volume < 0.0 {
        return Err(SeriesError::NegativeVolume { index });
    }
    Ok(())
}
