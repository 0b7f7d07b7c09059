//! Entry scanner: labels historically profitable entry points
//!
//! For every index in `[min_lookback, len - lookforward)` the scanner looks at the
//! next `lookforward` bars and records the best favourable excursion (and the bar
//! that reached it) and the worst adverse excursion. Indices that clear the profit
//! target without breaching the drawdown limit become [`Entry`] values.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::indicators::{IndicatorSnapshot, IndicatorTable};
use crate::types::{CandleSeries, Direction};

/// A historically successful entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub index: usize,
    pub timestamp: i64,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Best favourable excursion inside the lookforward window (fraction)
    pub profit: f64,
    /// Worst adverse excursion inside the lookforward window (fraction)
    pub drawdown: f64,
    /// Bars from entry to the bar that reached `profit`
    pub holding_period: usize,
    pub snapshot: IndicatorSnapshot,
}

/// Favourable/adverse excursion over a forward window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Excursion {
    pub max_profit: f64,
    pub max_drawdown: f64,
    /// 1-based offset of the first bar achieving `max_profit`
    pub exit_offset: usize,
}

/// Excursions over bars `i+1 ..= i+lookforward`.
///
/// Returns `None` if the window would run past the end of the series, so a
/// truncated tail can never produce an entry.
pub fn forward_excursion(
    series: &CandleSeries,
    i: usize,
    lookforward: usize,
    direction: Direction,
) -> Option<Excursion> {
    let candles = series.candles();
    if lookforward == 0 || i + lookforward >= candles.len() {
        return None;
    }

    let entry = candles[i].close;
    let mut max_profit = f64::NEG_INFINITY;
    let mut max_drawdown = f64::NEG_INFINITY;
    let mut exit_offset = 1;

    for j in 1..=lookforward {
        let bar = &candles[i + j];
        let (profit, drawdown) = match direction {
            Direction::Long => ((bar.high - entry) / entry, (entry - bar.low) / entry),
            Direction::Short => ((entry - bar.low) / entry, (bar.high - entry) / entry),
        };
        if profit > max_profit {
            max_profit = profit;
            exit_offset = j;
        }
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
        }
    }

    Some(Excursion {
        max_profit,
        max_drawdown,
        exit_offset,
    })
}

/// Scan the whole series for successful entries.
///
/// Never fails: a series too short for the configured lookback and lookforward
/// simply yields no entries.
pub fn scan_entries(
    series: &CandleSeries,
    table: &IndicatorTable,
    config: &AnalysisConfig,
) -> Vec<Entry> {
    let len = series.len();
    let lookforward = config.lookforward_bars;
    if len < config.min_bars_required() {
        debug!(
            bars = len,
            required = config.min_bars_required(),
            "Series too short to scan for entries"
        );
        return Vec::new();
    }

    let directions: &[Direction] = if config.include_short {
        &[Direction::Long, Direction::Short]
    } else {
        &[Direction::Long]
    };

    let candles = series.candles();
    let mut entries = Vec::new();

    for i in config.min_lookback..(len - lookforward) {
        for &direction in directions {
            let Some(exc) = forward_excursion(series, i, lookforward, direction) else {
                continue;
            };
            if exc.max_profit < config.min_profit_threshold
                || exc.max_drawdown > config.max_drawdown_threshold
            {
                continue;
            }

            entries.push(Entry {
                index: i,
                timestamp: candles[i].timestamp,
                direction,
                entry_price: candles[i].close,
                exit_price: candles[i + exc.exit_offset].close,
                profit: exc.max_profit,
                drawdown: exc.max_drawdown,
                holding_period: exc.exit_offset,
                snapshot: table.snapshot(i),
            });
        }
    }

    debug!(
        symbol = series.symbol(),
        scanned = len - lookforward - config.min_lookback,
        entries = entries.len(),
        "Entry scan complete"
    );

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;

    fn flat_candle(i: usize, price: f64) -> Candle {
        Candle {
            timestamp: (i as i64) * 3_600_000,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 100.0,
        }
    }

    fn build(candles: Vec<Candle>) -> (CandleSeries, IndicatorTable) {
        let series = CandleSeries::new("TESTUSDT", "1h", candles).unwrap();
        let table = IndicatorTable::compute(&series, &Default::default()).unwrap();
        (series, table)
    }

    /// Flat at 100 except a 10% spike on bars 51..=60 after the entry at bar 50
    fn spike_series() -> Vec<Candle> {
        (0..100)
            .map(|i| {
                let mut c = flat_candle(i, 100.0);
                if (51..=60).contains(&i) {
                    c.open = 100.0;
                    c.close = 104.0;
                    c.high = if i == 55 { 110.0 } else { 105.0 };
                    c.low = 99.0;
                }
                c
            })
            .collect()
    }

    fn spike_config() -> AnalysisConfig {
        AnalysisConfig {
            min_profit_threshold: 0.05,
            max_drawdown_threshold: 0.02,
            lookforward_bars: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_flat_series_produces_no_entries() {
        let (series, table) = build((0..300).map(|i| flat_candle(i, 100.0)).collect());
        let entries = scan_entries(&series, &table, &AnalysisConfig::default());
        assert!(entries.is_empty());
    }

    #[test]
    fn test_spike_labels_entry_at_bar_50() {
        let (series, table) = build(spike_series());
        let entries = scan_entries(&series, &table, &spike_config());

        let entry = entries
            .iter()
            .find(|e| e.index == 50)
            .expect("bar 50 should be an entry");
        assert!((entry.profit - 0.10).abs() < 1e-9, "profit {}", entry.profit);
        assert!((entry.drawdown - 0.01).abs() < 1e-9);
        assert_eq!(entry.holding_period, 5);
        assert_eq!(entry.exit_price, 104.0);
        assert_eq!(entry.entry_price, 100.0);
        assert_eq!(entry.direction, Direction::Long);
    }

    #[test]
    fn test_entries_respect_thresholds() {
        let (series, table) = build(spike_series());
        let config = spike_config();
        for entry in scan_entries(&series, &table, &config) {
            assert!(entry.profit >= config.min_profit_threshold);
            assert!(entry.drawdown <= config.max_drawdown_threshold);
            assert!(entry.index + config.lookforward_bars < series.len());
        }
    }

    #[test]
    fn test_drawdown_breach_rejects_entry() {
        let mut candles = spike_series();
        candles[52].low = 95.0;
        let (series, table) = build(candles);
        let entries = scan_entries(&series, &table, &spike_config());
        assert!(entries.iter().all(|e| e.index != 50));
    }

    #[test]
    fn test_short_entries_are_optional() {
        // Drop from 100 to 90 right after bar 50
        let candles: Vec<Candle> = (0..100)
            .map(|i| {
                let mut c = flat_candle(i, 100.0);
                if (51..=60).contains(&i) {
                    c.open = 100.0;
                    c.high = 100.5;
                    c.low = 90.0;
                    c.close = 92.0;
                }
                c
            })
            .collect();
        let (series, table) = build(candles);

        let long_only = scan_entries(&series, &table, &spike_config());
        assert!(long_only.iter().all(|e| e.direction == Direction::Long));
        assert!(long_only.iter().all(|e| e.index != 50));

        let config = AnalysisConfig {
            include_short: true,
            ..spike_config()
        };
        let entries = scan_entries(&series, &table, &config);
        let short = entries
            .iter()
            .find(|e| e.index == 50)
            .expect("bar 50 should be a short entry");
        assert_eq!(short.direction, Direction::Short);
        assert!((short.profit - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_truncated_tail_is_not_scanned() {
        let (series, _) = build((0..30).map(|i| flat_candle(i, 100.0)).collect());
        assert!(forward_excursion(&series, 25, 10, Direction::Long).is_none());
        assert!(forward_excursion(&series, 19, 10, Direction::Long).is_some());
        assert!(forward_excursion(&series, 20, 10, Direction::Long).is_none());
    }

    #[test]
    fn test_short_series_yields_nothing() {
        let (series, table) = build((0..55).map(|i| flat_candle(i, 100.0)).collect());
        assert!(scan_entries(&series, &table, &spike_config()).is_empty());
    }
}
