//! SQLite-backed report sink
//!
//! Bridges the engine's [`ReportSink`] seam to the persistence crate. Storage
//! errors surface as infrastructure failures, never retried.

use async_trait::async_trait;
use engine::{AnalysisConfig, AnalysisError, AnalysisReport, ReportSink};
use persistence::repository::{PatternRecord, ReportRecord, ReportRepository};
use persistence::SqlitePool;

pub struct DbReportSink {
    pool: SqlitePool,
    config_json: String,
}

impl DbReportSink {
    /// `config` is stored alongside every report written through this sink
    pub fn new(pool: SqlitePool, config: &AnalysisConfig) -> Self {
        Self {
            pool,
            config_json: serde_json::to_string(config).unwrap_or_else(|_| "{}".to_string()),
        }
    }
}

#[async_trait]
impl ReportSink for DbReportSink {
    async fn store_report(&self, report: &AnalysisReport) -> Result<i64, AnalysisError> {
        let (record, patterns) =
            to_records(report, &self.config_json).map_err(AnalysisError::store)?;
        ReportRepository::new(&self.pool)
            .save_report(&record, &patterns)
            .await
            .map_err(AnalysisError::store)
    }
}

/// Flatten a report into its stored row plus one row per ranked pattern
pub fn to_records(
    report: &AnalysisReport,
    config_json: &str,
) -> Result<(ReportRecord, Vec<PatternRecord>), serde_json::Error> {
    let record = ReportRecord {
        id: None,
        fingerprint: report.fingerprint.clone(),
        symbol: report.symbol.clone(),
        timeframe: report.timeframe.clone(),
        analysis_date: report.analysis_date.to_rfc3339(),
        entries_analyzed: report.entries_analyzed as i64,
        candles_analyzed: report.candles_analyzed as i64,
        triggers_found: report.statistics.triggers_found as i64,
        average_success_rate: report.statistics.average_success_rate,
        best_success_rate: report.statistics.best_success_rate,
        config_json: config_json.to_string(),
        report_json: serde_json::to_string(report)?,
        created_at: None,
    };

    let patterns = report
        .patterns
        .iter()
        .map(|p| {
            Ok(PatternRecord {
                id: None,
                report_id: 0,
                rank: p.rank as i64,
                symbol: report.symbol.clone(),
                timeframe: report.timeframe.clone(),
                pattern_key: p.key.clone(),
                direction: p.conditions.direction.to_string().to_lowercase(),
                description: p.description.clone(),
                occurrences: p.occurrences as i64,
                total_occurrences: p.total_occurrences as i64,
                successful_occurrences: p.successful_occurrences as i64,
                success_rate: p.success_rate,
                average_profit: p.average_profit,
                conditions_json: serde_json::to_string(&p.conditions)?,
            })
        })
        .collect::<Result<Vec<_>, serde_json::Error>>()?;

    Ok((record, patterns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use engine::{run_analysis_at, Candle, CandleSeries};
    use std::sync::atomic::AtomicBool;

    /// Slow uptrend with a 7% pop every 50 bars
    fn make_series() -> CandleSeries {
        let candles = (0..600)
            .map(|i| {
                let base = 50.0 + i as f64 * 0.02;
                let close = if i % 50 > 44 { base * 1.07 } else { base };
                Candle {
                    timestamp: 1_690_000_000_000 + i as i64 * 900_000,
                    open: base,
                    high: close * 1.002,
                    low: base * 0.998,
                    close,
                    volume: 10.0 + (i % 5) as f64,
                }
            })
            .collect();
        CandleSeries::new("SOLUSDT", "15m", candles).unwrap()
    }

    fn make_report() -> AnalysisReport {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        run_analysis_at(
            &make_series(),
            &AnalysisConfig::default(),
            &AtomicBool::new(false),
            date,
        )
        .unwrap()
    }

    #[test]
    fn test_to_records_flattens_patterns() {
        let report = make_report();
        let (record, patterns) = to_records(&report, "{}").unwrap();

        assert_eq!(record.symbol, "SOLUSDT");
        assert_eq!(record.analysis_date, "2024-05-01T00:00:00+00:00");
        assert_eq!(record.entries_analyzed, report.entries_analyzed as i64);
        assert_eq!(patterns.len(), report.patterns.len());
        for (i, p) in patterns.iter().enumerate() {
            assert_eq!(p.rank, i as i64 + 1);
            assert!(p.direction == "long" || p.direction == "short");
        }
    }

    #[tokio::test]
    async fn test_sink_stores_once_per_fingerprint() {
        let db = persistence::Database::in_memory().await.unwrap();
        let sink = DbReportSink::new(db.pool_clone(), &AnalysisConfig::default());
        let report = make_report();

        let first = sink.store_report(&report).await.unwrap();
        let second = sink.store_report(&report).await.unwrap();
        assert_eq!(first, second);

        let repo = ReportRepository::new(db.pool());
        let stored = repo.get_report(first).await.unwrap().unwrap();
        assert_eq!(stored.fingerprint, report.fingerprint);
        assert_eq!(
            repo.get_patterns_for_report(first).await.unwrap().len(),
            report.patterns.len()
        );
    }

    #[tokio::test]
    async fn test_different_configs_on_one_series_are_stored_separately() {
        let db = persistence::Database::in_memory().await.unwrap();
        let series = make_series();
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let no_patterns = AnalysisConfig {
            min_pattern_occurrences: 10_000,
            ..Default::default()
        };
        let one_entry = AnalysisConfig {
            top_entries_count: 1,
            ..no_patterns.clone()
        };

        let mut ids = Vec::new();
        for config in [&no_patterns, &one_entry] {
            let report = run_analysis_at(&series, config, &AtomicBool::new(false), date).unwrap();
            let sink = DbReportSink::new(db.pool_clone(), config);
            ids.push(sink.store_report(&report).await.unwrap());
        }
        assert_ne!(ids[0], ids[1]);

        let repo = ReportRepository::new(db.pool());
        let stored = repo.get_report(ids[1]).await.unwrap().unwrap();
        let body = stored.report_value().unwrap();
        assert!(body["top_entries"].as_array().unwrap().len() <= 1);
        assert!(stored.config_json.contains("\"top_entries_count\":1"));
    }
}
