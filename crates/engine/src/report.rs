//! Report assembly: ranking, top-N selection and summary statistics
//!
//! Pure and I/O-free. The assembled [`AnalysisReport`] is the single value handed
//! to whatever stores the results.

use std::cmp::Ordering;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AnalysisConfig;
use crate::patterns::TriggerConditions;
use crate::scanner::Entry;
use crate::success_rate::SuccessRateRecord;
use crate::types::{CandleSeries, Direction};

// ============================================================================
// Output types
// ============================================================================

/// One ranked pattern in the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub rank: usize,
    pub key: String,
    pub conditions: TriggerConditions,
    /// Entries that formed the pattern
    pub occurrences: usize,
    /// Mean short-horizon return over every recurrence in the series
    pub average_profit: f64,
    pub success_rate: f64,
    pub description: String,
    pub total_occurrences: usize,
    pub successful_occurrences: usize,
}

/// One of the most profitable historical entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub index: usize,
    pub timestamp: i64,
    pub date: Option<DateTime<Utc>>,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub profit: f64,
    pub drawdown: f64,
    pub holding_period: usize,
    pub rsi: f64,
    pub macd_crossover: bool,
    pub volume_ratio: f64,
    pub bollinger_position: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportStatistics {
    /// Mean success rate over every replayed pattern
    pub average_success_rate: f64,
    pub entries_analyzed: usize,
    pub triggers_found: usize,
    pub long_entries: usize,
    pub short_entries: usize,
    pub average_entry_profit: f64,
    pub average_holding_period: f64,
    pub best_success_rate: f64,
}

/// Result of one analysis run for a (symbol, timeframe) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub symbol: String,
    pub timeframe: String,
    pub analysis_date: DateTime<Utc>,
    pub entries_analyzed: usize,
    pub candles_analyzed: usize,
    pub patterns: Vec<PatternSummary>,
    pub top_entries: Vec<EntrySummary>,
    pub statistics: ReportStatistics,
    /// Top-N ranked records, same order as `patterns`
    pub records: Vec<SuccessRateRecord>,
    /// SHA-256 over the series identity, the config and every report field
    /// except `analysis_date`
    pub fingerprint: String,
}

impl AnalysisReport {
    pub fn is_empty(&self) -> bool {
        self.entries_analyzed == 0
    }
}

// ============================================================================
// Ranking
// ============================================================================

/// Ordering used for the ranked output.
///
/// Success rate desc, then average profit desc, then total occurrences desc,
/// then condition key asc, so equal statistics never leave the order open.
pub fn compare_records(a: &SuccessRateRecord, b: &SuccessRateRecord) -> Ordering {
    b.success_rate
        .total_cmp(&a.success_rate)
        .then_with(|| b.average_profit.total_cmp(&a.average_profit))
        .then_with(|| b.total_occurrences.cmp(&a.total_occurrences))
        .then_with(|| a.pattern.conditions.key().cmp(&b.pattern.conditions.key()))
}

pub fn rank_records(mut records: Vec<SuccessRateRecord>) -> Vec<SuccessRateRecord> {
    records.sort_by(compare_records);
    records
}

/// Most profitable entries first; earlier index wins on equal profit
fn rank_entries(entries: &[Entry], limit: usize) -> Vec<EntrySummary> {
    let mut sorted: Vec<&Entry> = entries.iter().collect();
    sorted.sort_by(|a, b| b.profit.total_cmp(&a.profit).then(a.index.cmp(&b.index)));

    sorted
        .into_iter()
        .take(limit)
        .map(|e| EntrySummary {
            index: e.index,
            timestamp: e.timestamp,
            date: Utc.timestamp_millis_opt(e.timestamp).single(),
            direction: e.direction,
            entry_price: e.entry_price,
            exit_price: e.exit_price,
            profit: e.profit,
            drawdown: e.drawdown,
            holding_period: e.holding_period,
            rsi: e.snapshot.rsi,
            macd_crossover: e.snapshot.macd_crossover,
            volume_ratio: e.snapshot.volume_ratio,
            bollinger_position: e.snapshot.bollinger_position,
        })
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Everything that identifies a run's result. The analysis date is left out so
/// re-running the same inputs yields the same fingerprint.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    symbol: &'a str,
    timeframe: &'a str,
    candles: usize,
    first_timestamp: i64,
    last_timestamp: i64,
    config: &'a AnalysisConfig,
    entries_analyzed: usize,
    patterns: &'a [PatternSummary],
    top_entries: &'a [EntrySummary],
    statistics: &'a ReportStatistics,
    records: &'a [SuccessRateRecord],
}

fn fingerprint(series: &CandleSeries, config: &AnalysisConfig, report: &AnalysisReport) -> String {
    let (first_timestamp, last_timestamp) = series.time_range().unwrap_or((0, 0));
    let input = FingerprintInput {
        symbol: series.symbol(),
        timeframe: series.timeframe(),
        candles: series.len(),
        first_timestamp,
        last_timestamp,
        config,
        entries_analyzed: report.entries_analyzed,
        patterns: &report.patterns,
        top_entries: &report.top_entries,
        statistics: &report.statistics,
        records: &report.records,
    };
    let json = serde_json::to_vec(&input).unwrap_or_default();
    format!("{:x}", Sha256::digest(&json))
}

// ============================================================================
// Assembly
// ============================================================================

/// Rank the records and entries and build the report value.
///
/// `analysis_date` is passed in rather than read from the clock so the report
/// body stays a pure function of its inputs.
pub fn assemble_report(
    series: &CandleSeries,
    entries: &[Entry],
    records: Vec<SuccessRateRecord>,
    config: &AnalysisConfig,
    analysis_date: DateTime<Utc>,
) -> AnalysisReport {
    let triggers_found = records.len();
    let average_success_rate = mean(records.iter().map(|r| r.success_rate));

    let mut ranked = rank_records(records);
    ranked.truncate(config.top_patterns_count);

    let patterns: Vec<PatternSummary> = ranked
        .iter()
        .enumerate()
        .map(|(i, r)| PatternSummary {
            rank: i + 1,
            key: r.pattern.conditions.key(),
            conditions: r.pattern.conditions.clone(),
            occurrences: r.pattern.occurrences,
            average_profit: r.average_profit,
            success_rate: r.success_rate,
            description: r.pattern.conditions.describe(),
            total_occurrences: r.total_occurrences,
            successful_occurrences: r.successful_occurrences,
        })
        .collect();

    let long_entries = entries
        .iter()
        .filter(|e| e.direction == Direction::Long)
        .count();

    let statistics = ReportStatistics {
        average_success_rate,
        entries_analyzed: entries.len(),
        triggers_found,
        long_entries,
        short_entries: entries.len() - long_entries,
        average_entry_profit: mean(entries.iter().map(|e| e.profit)),
        average_holding_period: mean(entries.iter().map(|e| e.holding_period as f64)),
        best_success_rate: ranked.first().map(|r| r.success_rate).unwrap_or(0.0),
    };

    let mut report = AnalysisReport {
        symbol: series.symbol().to_string(),
        timeframe: series.timeframe().to_string(),
        analysis_date,
        entries_analyzed: entries.len(),
        candles_analyzed: series.len(),
        patterns,
        top_entries: rank_entries(entries, config.top_entries_count),
        statistics,
        records: ranked,
        fingerprint: String::new(),
    };
    report.fingerprint = fingerprint(series, config, &report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorSnapshot;
    use crate::patterns::{group_entries, TriggerPattern};
    use crate::types::Candle;

    fn make_series(len: usize) -> CandleSeries {
        let candles = (0..len)
            .map(|i| Candle {
                timestamp: 1_700_000_000_000 + i as i64 * 3_600_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 10.0,
            })
            .collect();
        CandleSeries::new("BTCUSDT", "1h", candles).unwrap()
    }

    fn snapshot(rsi: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: 100.0,
            rsi,
            macd: 1.0,
            macd_signal: 0.5,
            macd_histogram: 0.5,
            ema_fast: 100.0,
            ema_mid: 100.0,
            ema_slow: 100.0,
            sma: 100.0,
            bollinger_upper: 102.0,
            bollinger_middle: 100.0,
            bollinger_lower: 98.0,
            bollinger_position: 0.5,
            atr: 1.0,
            stochastic_k: 50.0,
            volume_ratio: 1.0,
            support: 98.0,
            resistance: 102.0,
            macd_crossover: true,
            near_support: false,
            near_resistance: false,
        }
    }

    fn make_entry(index: usize, rsi: f64, profit: f64, direction: Direction) -> Entry {
        Entry {
            index,
            timestamp: 1_700_000_000_000 + index as i64 * 3_600_000,
            direction,
            entry_price: 100.0,
            exit_price: 100.0 * (1.0 + profit),
            profit,
            drawdown: 0.01,
            holding_period: 4,
            snapshot: snapshot(rsi),
        }
    }

    fn make_record(pattern: TriggerPattern, success_rate: f64, average_profit: f64, total: usize) -> SuccessRateRecord {
        SuccessRateRecord {
            pattern,
            success_rate,
            total_occurrences: total,
            successful_occurrences: (success_rate * total as f64).round() as usize,
            average_profit,
        }
    }

    fn patterns_for(rsis: &[f64]) -> Vec<TriggerPattern> {
        let entries: Vec<Entry> = rsis
            .iter()
            .enumerate()
            .map(|(i, &rsi)| make_entry(60 + i, rsi, 0.05, Direction::Long))
            .collect();
        group_entries(&entries, &AnalysisConfig::default())
    }

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_rank_by_success_rate_then_profit() {
        let p = patterns_for(&[10.0, 30.0, 50.0, 70.0]);
        let records = vec![
            make_record(p[0].clone(), 0.4, 0.02, 10),
            make_record(p[1].clone(), 0.8, 0.01, 10),
            make_record(p[2].clone(), 0.8, 0.03, 10),
            make_record(p[3].clone(), 0.6, 0.05, 10),
        ];
        let ranked = rank_records(records);
        let rates: Vec<(f64, f64)> = ranked.iter().map(|r| (r.success_rate, r.average_profit)).collect();
        assert_eq!(rates, vec![(0.8, 0.03), (0.8, 0.01), (0.6, 0.05), (0.4, 0.02)]);
    }

    #[test]
    fn test_full_ties_fall_back_to_key() {
        let p = patterns_for(&[70.0, 20.0]);
        let records = vec![
            make_record(p[0].clone(), 0.5, 0.02, 4),
            make_record(p[1].clone(), 0.5, 0.02, 4),
        ];
        let ranked = rank_records(records.clone());
        let reversed = rank_records(records.into_iter().rev().collect());
        assert_eq!(ranked, reversed);
        assert!(ranked[0].pattern.conditions.key() < ranked[1].pattern.conditions.key());
    }

    #[test]
    fn test_report_statistics_and_caps() {
        let series = make_series(200);
        let entries = vec![
            make_entry(60, 30.0, 0.06, Direction::Long),
            make_entry(61, 31.0, 0.09, Direction::Long),
            make_entry(90, 70.0, 0.07, Direction::Short),
        ];
        let p = patterns_for(&[10.0, 30.0, 50.0]);
        let records = vec![
            make_record(p[0].clone(), 0.2, 0.01, 5),
            make_record(p[1].clone(), 0.6, 0.02, 5),
            make_record(p[2].clone(), 1.0, 0.03, 2),
        ];
        let config = AnalysisConfig {
            top_patterns_count: 2,
            top_entries_count: 2,
            ..Default::default()
        };

        let report = assemble_report(&series, &entries, records, &config, date());

        assert_eq!(report.symbol, "BTCUSDT");
        assert_eq!(report.timeframe, "1h");
        assert_eq!(report.entries_analyzed, 3);
        assert_eq!(report.candles_analyzed, 200);
        assert_eq!(report.patterns.len(), 2);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.patterns[0].rank, 1);
        assert_eq!(report.patterns[0].success_rate, 1.0);
        assert_eq!(report.patterns[1].success_rate, 0.6);

        let stats = &report.statistics;
        assert_eq!(stats.triggers_found, 3);
        assert!((stats.average_success_rate - 0.6).abs() < 1e-12);
        assert_eq!(stats.best_success_rate, 1.0);
        assert_eq!(stats.long_entries, 2);
        assert_eq!(stats.short_entries, 1);
        assert!((stats.average_entry_profit - 0.0733333333).abs() < 1e-6);
        assert_eq!(stats.average_holding_period, 4.0);

        assert_eq!(report.top_entries.len(), 2);
        assert_eq!(report.top_entries[0].index, 61);
        assert_eq!(report.top_entries[1].index, 90);
        assert!(report.top_entries[0].date.is_some());
    }

    #[test]
    fn test_empty_report() {
        let series = make_series(20);
        let report = assemble_report(&series, &[], Vec::new(), &AnalysisConfig::default(), date());
        assert!(report.is_empty());
        assert_eq!(report.statistics, ReportStatistics::default());
        assert!(report.patterns.is_empty());
        assert!(report.top_entries.is_empty());
        assert_eq!(report.fingerprint.len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_series_and_records() {
        let config = AnalysisConfig::default();
        let a = assemble_report(&make_series(20), &[], Vec::new(), &config, date());
        let b = assemble_report(&make_series(20), &[], Vec::new(), &config, Utc::now());
        let c = assemble_report(&make_series(21), &[], Vec::new(), &config, date());
        assert_eq!(a.fingerprint, b.fingerprint, "date must not affect fingerprint");
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn test_fingerprint_depends_on_config() {
        let series = make_series(20);
        let base = AnalysisConfig::default();
        let fewer_entries = AnalysisConfig {
            top_entries_count: 1,
            ..Default::default()
        };
        let a = assemble_report(&series, &[], Vec::new(), &base, date());
        let b = assemble_report(&series, &[], Vec::new(), &fewer_entries, date());
        assert_ne!(a.fingerprint, b.fingerprint, "config must be part of the fingerprint");
    }

    #[test]
    fn test_analysis_date_serializes_as_iso8601() {
        let report = assemble_report(&make_series(20), &[], Vec::new(), &AnalysisConfig::default(), date());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["analysis_date"], "2024-03-01T12:00:00Z");
    }
}
