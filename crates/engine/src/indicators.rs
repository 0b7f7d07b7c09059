//! Indicator library for entry discovery
//!
//! Pure per-index functions (RSI, SMA, EMA, MACD, Bollinger, volume ratio) with
//! neutral defaults while the lookback window is still filling, plus an
//! [`IndicatorTable`] that computes every column once per run. The scanner and
//! the success-rate replay both read snapshots from the same table, so the two
//! stages always see identical values.
//!
//! RSI and EMA (and the MACD built on it) are hand-rolled: the pattern
//! statistics use a simple-average RSI and an SMA-seeded EMA, while `ta`
//! smooths RSI with Wilder's EMA and seeds its EMA with the first price.
//! SMA, Bollinger bands, ATR, Stochastic, volume SMA and the rolling
//! support / resistance extremes come from `ta` indicators fed bar by bar.

use serde::{Deserialize, Serialize};
use ta::indicators::{
    AverageTrueRange, BollingerBands, FastStochastic, Maximum, Minimum, SimpleMovingAverage,
};
use ta::{DataItem, Next};

use crate::config::IndicatorSettings;
use crate::error::AnalysisError;
use crate::types::{Candle, CandleSeries, SeriesError};

// ============================================================================
// Pure per-index functions
// ============================================================================

/// Simple moving average of the `period` values ending at `i`.
///
/// Returns `values[i]` while the window is incomplete (0 if `i` is out of range).
pub fn sma(values: &[f64], i: usize, period: usize) -> f64 {
    let Some(&current) = values.get(i) else {
        return 0.0;
    };
    if i + 1 < period {
        return current;
    }
    let Ok(mut avg) = SimpleMovingAverage::new(period) else {
        return current;
    };
    values[i + 1 - period..=i]
        .iter()
        .fold(current, |_, &v| avg.next(v))
}

/// RSI over the `period` price changes ending at `i`.
///
/// Average gain / average loss use simple means. Zero average loss gives 100,
/// an incomplete window gives the neutral 50.
pub fn rsi(closes: &[f64], i: usize, period: usize) -> f64 {
    if period == 0 || i < period || i >= closes.len() {
        return 50.0;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for k in (i + 1 - period)..=i {
        let change = closes[k] - closes[k - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// EMA over the whole series.
///
/// Seeded with the simple average of the first `period` values, then
/// `ema = (price - ema) * (2 / (period + 1)) + ema`. Indices before the seed are `None`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(ema);

    for (idx, &price) in values.iter().enumerate().skip(period) {
        ema = (price - ema) * k + ema;
        out[idx] = Some(ema);
    }
    out
}

/// MACD line, signal line and histogram for every index
#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// `EMA(fast) - EMA(slow)` with a true `signal`-period EMA of the MACD line.
///
/// The MACD line is 0 until the slow EMA is seeded; the signal line and the
/// histogram are 0 until `signal` MACD values exist to seed the signal EMA.
pub fn macd_series(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let n = closes.len();
    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);

    let mut macd = vec![0.0; n];
    let mut first_defined = None;
    for idx in 0..n {
        if let (Some(f), Some(s)) = (fast_ema[idx], slow_ema[idx]) {
            macd[idx] = f - s;
            first_defined.get_or_insert(idx);
        }
    }

    let mut signal_line = vec![0.0; n];
    let mut histogram = vec![0.0; n];
    if let Some(start) = first_defined {
        let signal_ema = ema_series(&macd[start..], signal);
        for (offset, value) in signal_ema.into_iter().enumerate() {
            if let Some(sig) = value {
                let idx = start + offset;
                signal_line[idx] = sig;
                histogram[idx] = macd[idx] - sig;
            }
        }
    }

    MacdSeries {
        macd,
        signal: signal_line,
        histogram,
    }
}

/// Bollinger band values at one index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerOutput {
    fn collapsed(price: f64) -> Self {
        Self {
            upper: price,
            middle: price,
            lower: price,
        }
    }

    /// Where `price` sits inside the bands: 0 = lower band, 1 = upper band.
    /// Collapsed bands give 0.5.
    pub fn position(&self, price: f64) -> f64 {
        let width = self.upper - self.lower;
        if width <= 0.0 {
            0.5
        } else {
            (price - self.lower) / width
        }
    }
}

/// `SMA(period) ± multiplier × stddev(period)` (population standard deviation).
///
/// While the window is incomplete all three bands equal the current close.
pub fn bollinger(closes: &[f64], i: usize, period: usize, multiplier: f64) -> BollingerOutput {
    let current = closes.get(i).copied().unwrap_or(0.0);
    if i + 1 < period || i >= closes.len() {
        return BollingerOutput::collapsed(current);
    }
    let Ok(mut bands) = BollingerBands::new(period, multiplier) else {
        return BollingerOutput::collapsed(current);
    };

    closes[i + 1 - period..=i]
        .iter()
        .fold(BollingerOutput::collapsed(current), |_, &v| {
            bands.next(v).into()
        })
}

impl From<ta::indicators::BollingerBandsOutput> for BollingerOutput {
    fn from(out: ta::indicators::BollingerBandsOutput) -> Self {
        Self {
            upper: out.upper,
            middle: out.average,
            lower: out.lower,
        }
    }
}

/// Current volume over its `period` SMA; 1.0 while the window is incomplete
/// or the average volume is zero.
pub fn volume_ratio(volumes: &[f64], i: usize, period: usize) -> f64 {
    if period == 0 || i + 1 < period || i >= volumes.len() {
        return 1.0;
    }
    let avg = sma(volumes, i, period);
    if avg <= 0.0 {
        1.0
    } else {
        volumes[i] / avg
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Every indicator value at one series index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub ema_fast: f64,
    pub ema_mid: f64,
    pub ema_slow: f64,
    pub sma: f64,
    pub bollinger_upper: f64,
    pub bollinger_middle: f64,
    pub bollinger_lower: f64,
    pub bollinger_position: f64,
    pub atr: f64,
    pub stochastic_k: f64,
    pub volume_ratio: f64,
    pub support: f64,
    pub resistance: f64,
    pub macd_crossover: bool,
    pub near_support: bool,
    pub near_resistance: bool,
}

// ============================================================================
// Per-run indicator table
// ============================================================================

/// All indicator columns for one series, computed once per analysis run
#[derive(Debug, Clone)]
pub struct IndicatorTable {
    closes: Vec<f64>,
    rsi: Vec<f64>,
    macd: MacdSeries,
    ema_fast: Vec<Option<f64>>,
    ema_mid: Vec<Option<f64>>,
    ema_slow: Vec<Option<f64>>,
    bollinger: Vec<BollingerOutput>,
    atr: Vec<f64>,
    stochastic_k: Vec<f64>,
    volume_ratio: Vec<f64>,
    support: Vec<f64>,
    resistance: Vec<f64>,
    sr_lookback: usize,
    sr_proximity: f64,
}

impl IndicatorTable {
    pub fn compute(
        series: &CandleSeries,
        settings: &IndicatorSettings,
    ) -> Result<Self, AnalysisError> {
        let closes = series.closes();
        let n = closes.len();

        let rsi = (0..n).map(|i| rsi(&closes, i, settings.rsi_period)).collect();
        let macd = macd_series(
            &closes,
            settings.macd_fast,
            settings.macd_slow,
            settings.macd_signal,
        );
        let streamed = stream_indicators(series.candles(), settings)?;

        Ok(Self {
            rsi,
            macd,
            ema_fast: ema_series(&closes, settings.ema_fast),
            ema_mid: ema_series(&closes, settings.ema_mid),
            ema_slow: ema_series(&closes, settings.ema_slow),
            bollinger: streamed.bollinger,
            atr: streamed.atr,
            stochastic_k: streamed.stochastic_k,
            volume_ratio: streamed.volume_ratio,
            support: streamed.support,
            resistance: streamed.resistance,
            sr_lookback: settings.support_resistance_lookback,
            sr_proximity: settings.support_resistance_proximity,
            closes,
        })
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    /// Snapshot at index `i`. Panics if `i >= self.len()`.
    pub fn snapshot(&self, i: usize) -> IndicatorSnapshot {
        let close = self.closes[i];
        let bands = self.bollinger[i];
        let sr_ready = i + 1 >= self.sr_lookback;
        let support = self.support[i];
        let resistance = self.resistance[i];

        IndicatorSnapshot {
            close,
            rsi: self.rsi[i],
            macd: self.macd.macd[i],
            macd_signal: self.macd.signal[i],
            macd_histogram: self.macd.histogram[i],
            ema_fast: self.ema_fast[i].unwrap_or(close),
            ema_mid: self.ema_mid[i].unwrap_or(close),
            ema_slow: self.ema_slow[i].unwrap_or(close),
            sma: bands.middle,
            bollinger_upper: bands.upper,
            bollinger_middle: bands.middle,
            bollinger_lower: bands.lower,
            bollinger_position: bands.position(close),
            atr: self.atr[i],
            stochastic_k: self.stochastic_k[i],
            volume_ratio: self.volume_ratio[i],
            support,
            resistance,
            macd_crossover: self.macd.macd[i] > self.macd.signal[i],
            near_support: sr_ready && (close - support) / close <= self.sr_proximity,
            near_resistance: sr_ready && (resistance - close) / close <= self.sr_proximity,
        }
    }

    pub fn get(&self, i: usize) -> Option<IndicatorSnapshot> {
        (i < self.len()).then(|| self.snapshot(i))
    }
}

struct StreamedColumns {
    bollinger: Vec<BollingerOutput>,
    volume_ratio: Vec<f64>,
    atr: Vec<f64>,
    stochastic_k: Vec<f64>,
    support: Vec<f64>,
    resistance: Vec<f64>,
}

fn ta_param_error(name: &str, err: impl std::fmt::Debug) -> AnalysisError {
    AnalysisError::InvalidConfig(format!("{name}: {err:?}"))
}

fn to_data_item(index: usize, candle: &Candle) -> Result<DataItem, AnalysisError> {
    DataItem::builder()
        .open(candle.open)
        .high(candle.high)
        .low(candle.low)
        .close(candle.close)
        .volume(candle.volume)
        .build()
        .map_err(|_| AnalysisError::InvalidSeries(SeriesError::InvertedRange { index }))
}

/// Feed the candles through the `ta` streaming indicators in one pass
fn stream_indicators(
    candles: &[Candle],
    settings: &IndicatorSettings,
) -> Result<StreamedColumns, AnalysisError> {
    let mut bands = BollingerBands::new(settings.bollinger_period, settings.bollinger_multiplier)
        .map_err(|e| ta_param_error("bollinger_period", e))?;
    let mut volume_avg = SimpleMovingAverage::new(settings.volume_period)
        .map_err(|e| ta_param_error("volume_period", e))?;
    let mut atr =
        AverageTrueRange::new(settings.atr_period).map_err(|e| ta_param_error("atr_period", e))?;
    let mut stoch = FastStochastic::new(settings.stochastic_period)
        .map_err(|e| ta_param_error("stochastic_period", e))?;
    let mut lowest = Minimum::new(settings.support_resistance_lookback)
        .map_err(|e| ta_param_error("support_resistance_lookback", e))?;
    let mut highest = Maximum::new(settings.support_resistance_lookback)
        .map_err(|e| ta_param_error("support_resistance_lookback", e))?;

    let n = candles.len();
    let mut columns = StreamedColumns {
        bollinger: Vec::with_capacity(n),
        volume_ratio: Vec::with_capacity(n),
        atr: Vec::with_capacity(n),
        stochastic_k: Vec::with_capacity(n),
        support: Vec::with_capacity(n),
        resistance: Vec::with_capacity(n),
    };

    for (i, candle) in candles.iter().enumerate() {
        let bar = to_data_item(i, candle)?;
        let band_val = bands.next(candle.close);
        let avg_volume = volume_avg.next(candle.volume);
        let atr_val = atr.next(&bar);
        let k_val = stoch.next(&bar);
        let support = lowest.next(candle.low);
        let resistance = highest.next(candle.high);

        columns.bollinger.push(if i + 1 < settings.bollinger_period {
            BollingerOutput::collapsed(candle.close)
        } else {
            band_val.into()
        });
        columns.volume_ratio.push(
            if i + 1 < settings.volume_period || avg_volume <= 0.0 {
                1.0
            } else {
                candle.volume / avg_volume
            },
        );
        columns
            .atr
            .push(if i + 1 < settings.atr_period { 0.0 } else { atr_val });
        columns
            .stochastic_k
            .push(if i + 1 < settings.stochastic_period { 50.0 } else { k_val });
        columns.support.push(support);
        columns.resistance.push(resistance);
    }

    Ok(columns)
}
