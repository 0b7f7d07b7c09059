//! End-to-end pipeline scenarios

use std::sync::atomic::AtomicBool;

use chrono::{TimeZone, Utc};
use engine::{
    group_entries, run_analysis, run_analysis_at, scan_entries, AnalysisConfig, Candle,
    CandleSeries, Direction, Entry, IndicatorTable, TriggerPattern,
};
use engine::success_rate::replay_pattern;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn flat(i: usize, price: f64) -> Candle {
    Candle {
        timestamp: 1_700_000_000_000 + i as i64 * 3_600_000,
        open: price,
        high: price,
        low: price,
        close: price,
        volume: 1_000.0,
    }
}

fn series(candles: Vec<Candle>) -> CandleSeries {
    CandleSeries::new("BTCUSDT", "1h", candles).unwrap()
}

fn random_walk(seed: u64, len: usize) -> CandleSeries {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price: f64 = 250.0;
    let candles = (0..len)
        .map(|i| {
            let open = price;
            price *= 1.0 + rng.gen_range(-0.025..0.026);
            let close = price;
            Candle {
                timestamp: 1_700_000_000_000 + i as i64 * 900_000,
                open,
                high: open.max(close) * (1.0 + rng.gen_range(0.0..0.006)),
                low: open.min(close) * (1.0 - rng.gen_range(0.0..0.006)),
                close,
                volume: rng.gen_range(500.0..5_000.0),
            }
        })
        .collect();
    CandleSeries::new("ETHUSDT", "15m", candles).unwrap()
}

fn no_cancel() -> AtomicBool {
    AtomicBool::new(false)
}

#[test]
fn flat_series_yields_no_entries() {
    let s = series((0..300).map(|i| flat(i, 100.0)).collect());
    let report = run_analysis(&s, &AnalysisConfig::default(), &no_cancel()).unwrap();

    assert_eq!(report.entries_analyzed, 0);
    assert_eq!(report.candles_analyzed, 300);
    assert!(report.patterns.is_empty());
    assert!(report.top_entries.is_empty());
    assert_eq!(report.statistics.triggers_found, 0);
}

#[test]
fn ten_percent_spike_is_labelled_at_bar_50() {
    let candles: Vec<Candle> = (0..120)
        .map(|i| {
            let mut c = flat(i, 100.0);
            if (51..=60).contains(&i) {
                c.high = 110.0;
                c.close = 105.0;
                c.open = 100.5;
                c.low = 99.5;
            }
            c
        })
        .collect();
    let s = series(candles);
    let config = AnalysisConfig {
        min_profit_threshold: 0.05,
        max_drawdown_threshold: 0.02,
        lookforward_bars: 10,
        ..Default::default()
    };

    let report = run_analysis(&s, &config, &no_cancel()).unwrap();
    let entry = report
        .top_entries
        .iter()
        .find(|e| e.index == 50)
        .expect("bar 50 must be a successful entry");
    assert!((entry.profit - 0.10).abs() < 1e-9, "profit {}", entry.profit);
    assert!(entry.drawdown <= 0.02);
    assert_eq!(entry.direction, Direction::Long);
}

#[test]
fn nearby_rsi_entries_share_a_pattern() {
    let s = random_walk(42, 400);
    let config = AnalysisConfig::default();
    let table = IndicatorTable::compute(&s, &config.indicators).unwrap();

    let mut low = table.snapshot(100);
    low.rsi = 28.0;
    let mut high = low;
    high.rsi = 31.0;

    let make = |index: usize, snapshot| Entry {
        index,
        timestamp: s.candles()[index].timestamp,
        direction: Direction::Long,
        entry_price: 100.0,
        exit_price: 106.0,
        profit: 0.06,
        drawdown: 0.01,
        holding_period: 5,
        snapshot,
    };
    let patterns = group_entries(&[make(100, low), make(140, high)], &config);

    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].occurrences, 2);
    assert_eq!(patterns[0].instances[1].timestamp, s.candles()[140].timestamp);
}

#[test]
fn impossible_pattern_has_exact_zero_success_rate() {
    let s = random_walk(7, 2_000);
    let config = AnalysisConfig {
        min_profit_threshold: 0.02,
        include_short: true,
        ..Default::default()
    };
    let table = IndicatorTable::compute(&s, &config.indicators).unwrap();
    let entries = scan_entries(&s, &table, &config);
    let mut pattern: TriggerPattern = group_entries(&entries, &config)
        .into_iter()
        .next()
        .expect("random walk should produce at least one pattern");

    // RSI is bounded to [0, 100], so no bar can ever match
    pattern.conditions.rsi_anchor = -50.0;
    pattern.conditions.rsi_tolerance = 1.0;

    let record = replay_pattern(&pattern, &s, &table, &config);
    assert_eq!(record.total_occurrences, 0);
    assert_eq!(record.successful_occurrences, 0);
    assert_eq!(record.success_rate, 0.0);
    assert!(!record.success_rate.is_nan());
}

#[test]
fn rerunning_yields_identical_ranked_output() {
    let s = random_walk(99, 3_000);
    let config = AnalysisConfig {
        min_profit_threshold: 0.03,
        include_short: true,
        ..Default::default()
    };
    let date = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let first = run_analysis_at(&s, &config, &no_cancel(), date).unwrap();
    let second = run_analysis_at(&s, &config, &no_cancel(), date).unwrap();

    assert!(first.entries_analyzed > 0);
    assert_eq!(
        serde_json::to_vec(&first.records).unwrap(),
        serde_json::to_vec(&second.records).unwrap()
    );
    assert_eq!(first.patterns, second.patterns);
    assert_eq!(first.fingerprint, second.fingerprint);
}

#[test]
fn short_series_is_a_no_op() {
    let config = AnalysisConfig::default();
    let len = config.min_lookback + config.lookforward_bars;
    let s = random_walk(3, len);

    let report = run_analysis(&s, &config, &no_cancel()).unwrap();
    assert_eq!(report.entries_analyzed, 0);
    assert!(report.records.is_empty());
}

#[test]
fn invariants_hold_on_random_walks() {
    for seed in 0..5 {
        let s = random_walk(seed, 1_500);
        let config = AnalysisConfig {
            min_profit_threshold: 0.025,
            max_drawdown_threshold: 0.015,
            include_short: true,
            top_patterns_count: usize::MAX,
            ..Default::default()
        };
        let report = run_analysis(&s, &config, &no_cancel()).unwrap();

        for entry in &report.top_entries {
            assert!(entry.profit >= config.min_profit_threshold);
            assert!(entry.drawdown <= config.max_drawdown_threshold);
        }
        for record in &report.records {
            assert!((0.0..=1.0).contains(&record.success_rate));
            assert!(record.successful_occurrences <= record.total_occurrences);
        }
        for pair in report.patterns.windows(2) {
            assert!(pair[0].success_rate >= pair[1].success_rate);
        }
    }
}
