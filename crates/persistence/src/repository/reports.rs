//! Analysis reports repository: stored runs and their ranked trigger patterns

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

/// One stored analysis run
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReportRecord {
    pub id: Option<i64>,
    pub fingerprint: String,
    pub symbol: String,
    pub timeframe: String,
    /// ISO-8601
    pub analysis_date: String,
    pub entries_analyzed: i64,
    pub candles_analyzed: i64,
    pub triggers_found: i64,
    pub average_success_rate: f64,
    pub best_success_rate: f64,
    pub config_json: String,
    pub report_json: String,
    pub created_at: Option<i64>,
}

impl ReportRecord {
    /// The full report body as JSON
    pub fn report_value(&self) -> DbResult<serde_json::Value> {
        serde_json::from_str(&self.report_json).map_err(|e| DbError::Serialization(e.to_string()))
    }
}

/// Report row without the JSON bodies, for listings
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReportSummary {
    pub id: i64,
    pub fingerprint: String,
    pub symbol: String,
    pub timeframe: String,
    pub analysis_date: String,
    pub entries_analyzed: i64,
    pub candles_analyzed: i64,
    pub triggers_found: i64,
    pub average_success_rate: f64,
    pub best_success_rate: f64,
}

/// One ranked trigger pattern of a stored report
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PatternRecord {
    pub id: Option<i64>,
    /// Filled in by [`ReportRepository::save_report`]
    pub report_id: i64,
    pub rank: i64,
    pub symbol: String,
    pub timeframe: String,
    pub pattern_key: String,
    pub direction: String,
    pub description: String,
    pub occurrences: i64,
    pub total_occurrences: i64,
    pub successful_occurrences: i64,
    pub success_rate: f64,
    pub average_profit: f64,
    pub conditions_json: String,
}

/// Aggregated stats over the whole store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_reports: i64,
    pub total_patterns: i64,
    pub unique_symbols: i64,
    pub best_success_rate: f64,
    pub best_pattern: String,
    pub last_analysis_date: Option<String>,
}

const REPORT_COLUMNS: &str = r#"
    id, fingerprint, symbol, timeframe, analysis_date,
    entries_analyzed, candles_analyzed, triggers_found,
    average_success_rate, best_success_rate,
    config_json, report_json, created_at
"#;

const SUMMARY_COLUMNS: &str = r#"
    id, fingerprint, symbol, timeframe, analysis_date,
    entries_analyzed, candles_analyzed, triggers_found,
    average_success_rate, best_success_rate
"#;

const PATTERN_COLUMNS: &str = r#"
    p.id, p.report_id, p.rank, p.symbol, p.timeframe, p.pattern_key, p.direction,
    p.description, p.occurrences, p.total_occurrences, p.successful_occurrences,
    p.success_rate, p.average_profit, p.conditions_json
"#;

/// Repository for analysis reports
pub struct ReportRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ReportRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Save a report with its patterns in one transaction.
    ///
    /// INSERT OR IGNORE on the fingerprint: re-storing an identical run returns
    /// the id of the existing row and writes nothing.
    pub async fn save_report(
        &self,
        report: &ReportRecord,
        patterns: &[PatternRecord],
    ) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO analysis_reports (
                fingerprint, symbol, timeframe, analysis_date,
                entries_analyzed, candles_analyzed, triggers_found,
                average_success_rate, best_success_rate,
                config_json, report_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.fingerprint)
        .bind(&report.symbol)
        .bind(&report.timeframe)
        .bind(&report.analysis_date)
        .bind(report.entries_analyzed)
        .bind(report.candles_analyzed)
        .bind(report.triggers_found)
        .bind(report.average_success_rate)
        .bind(report.best_success_rate)
        .bind(&report.config_json)
        .bind(&report.report_json)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let (existing,): (i64,) =
                sqlx::query_as("SELECT id FROM analysis_reports WHERE fingerprint = ?")
                    .bind(&report.fingerprint)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.commit().await?;
            debug!(id = existing, fingerprint = %report.fingerprint, "Report already stored");
            return Ok(existing);
        }

        let report_id = result.last_insert_rowid();

        for pattern in patterns {
            sqlx::query(
                r#"
                INSERT INTO trigger_patterns (
                    report_id, rank, symbol, timeframe, pattern_key, direction,
                    description, occurrences, total_occurrences, successful_occurrences,
                    success_rate, average_profit, conditions_json
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(report_id)
            .bind(pattern.rank)
            .bind(&pattern.symbol)
            .bind(&pattern.timeframe)
            .bind(&pattern.pattern_key)
            .bind(&pattern.direction)
            .bind(&pattern.description)
            .bind(pattern.occurrences)
            .bind(pattern.total_occurrences)
            .bind(pattern.successful_occurrences)
            .bind(pattern.success_rate)
            .bind(pattern.average_profit)
            .bind(&pattern.conditions_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(id = report_id, patterns = patterns.len(), "Stored analysis report");
        Ok(report_id)
    }

    pub async fn get_report(&self, id: i64) -> DbResult<Option<ReportRecord>> {
        let sql = format!("SELECT {REPORT_COLUMNS} FROM analysis_reports WHERE id = ?");
        let record = sqlx::query_as::<_, ReportRecord>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(record)
    }

    /// Most recent report, optionally narrowed to a symbol and/or timeframe
    pub async fn get_latest(
        &self,
        symbol: Option<&str>,
        timeframe: Option<&str>,
    ) -> DbResult<Option<ReportRecord>> {
        let mut sql = format!("SELECT {REPORT_COLUMNS} FROM analysis_reports WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(sym) = symbol {
            sql.push_str(" AND symbol = ?");
            binds.push(sym.to_string());
        }
        if let Some(tf) = timeframe {
            sql.push_str(" AND timeframe = ?");
            binds.push(tf.to_string());
        }
        sql.push_str(" ORDER BY analysis_date DESC, id DESC LIMIT 1");

        let mut query = sqlx::query_as::<_, ReportRecord>(&sql);
        for b in &binds {
            query = query.bind(b);
        }

        let record = query.fetch_optional(self.pool).await?;
        Ok(record)
    }

    /// Paginated report listing (newest first) with the total row count
    pub async fn list_reports(
        &self,
        limit: i64,
        offset: i64,
        symbol: Option<&str>,
    ) -> DbResult<(Vec<ReportSummary>, i64)> {
        let (where_sql, binds) = match symbol {
            Some(sym) => ("symbol = ?", vec![sym.to_string()]),
            None => ("1=1", Vec::new()),
        };

        let count_sql = format!("SELECT COUNT(*) FROM analysis_reports WHERE {where_sql}");
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        for b in &binds {
            count_query = count_query.bind(b);
        }
        let (total,) = count_query.fetch_one(self.pool).await?;

        let data_sql = format!(
            r#"
            SELECT {SUMMARY_COLUMNS}
            FROM analysis_reports
            WHERE {where_sql}
            ORDER BY analysis_date DESC, id DESC
            LIMIT ? OFFSET ?
            "#
        );
        let mut data_query = sqlx::query_as::<_, ReportSummary>(&data_sql);
        for b in &binds {
            data_query = data_query.bind(b);
        }
        data_query = data_query.bind(limit).bind(offset);

        let records = data_query.fetch_all(self.pool).await?;
        Ok((records, total))
    }

    /// Best patterns across the latest report of every (symbol, timeframe) pair.
    ///
    /// Same ordering as the report ranking: success rate, average profit,
    /// total occurrences, then pattern key.
    pub async fn get_top_patterns(
        &self,
        limit: i64,
        symbol: Option<&str>,
        min_occurrences: i64,
    ) -> DbResult<Vec<PatternRecord>> {
        let mut sql = format!(
            r#"
            WITH latest AS (
              SELECT id,
                ROW_NUMBER() OVER (
                  PARTITION BY symbol, timeframe ORDER BY analysis_date DESC, id DESC
                ) AS rn
              FROM analysis_reports
            )
            SELECT {PATTERN_COLUMNS}
            FROM trigger_patterns p
            JOIN latest l ON l.id = p.report_id
            WHERE l.rn = 1 AND p.total_occurrences >= ?
            "#
        );
        if symbol.is_some() {
            sql.push_str(" AND p.symbol = ?");
        }
        sql.push_str(
            " ORDER BY p.success_rate DESC, p.average_profit DESC, p.total_occurrences DESC, p.pattern_key ASC LIMIT ?",
        );

        let mut query = sqlx::query_as::<_, PatternRecord>(&sql).bind(min_occurrences);
        if let Some(sym) = symbol {
            query = query.bind(sym);
        }
        let records = query.bind(limit).fetch_all(self.pool).await?;
        Ok(records)
    }

    /// Patterns of one report in rank order
    pub async fn get_patterns_for_report(&self, report_id: i64) -> DbResult<Vec<PatternRecord>> {
        let sql = format!(
            "SELECT {PATTERN_COLUMNS} FROM trigger_patterns p WHERE p.report_id = ? ORDER BY p.rank ASC"
        );
        let records = sqlx::query_as::<_, PatternRecord>(&sql)
            .bind(report_id)
            .fetch_all(self.pool)
            .await?;
        Ok(records)
    }

    /// Get aggregated store stats
    pub async fn get_stats(&self) -> DbResult<StoreStats> {
        let total_reports: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM analysis_reports")
            .fetch_one(self.pool)
            .await?;

        let total_patterns: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trigger_patterns")
            .fetch_one(self.pool)
            .await?;

        let unique_symbols: (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT symbol) FROM analysis_reports")
                .fetch_one(self.pool)
                .await?;

        let last_date: Option<(String,)> = sqlx::query_as(
            "SELECT analysis_date FROM analysis_reports ORDER BY analysis_date DESC LIMIT 1",
        )
        .fetch_optional(self.pool)
        .await?;

        let best: Option<(f64, String)> = sqlx::query_as(
            r#"
            SELECT success_rate, symbol || ' ' || description
            FROM trigger_patterns
            ORDER BY success_rate DESC, average_profit DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool)
        .await?;

        let (best_success_rate, best_pattern) =
            best.unwrap_or_else(|| (0.0, "N/A".to_string()));

        Ok(StoreStats {
            total_reports: total_reports.0,
            total_patterns: total_patterns.0,
            unique_symbols: unique_symbols.0,
            best_success_rate,
            best_pattern,
            last_analysis_date: last_date.map(|(d,)| d),
        })
    }

    /// Keep the latest `keep` reports per (symbol, timeframe), delete the rest.
    ///
    /// Returns `(deleted, remaining)` report counts.
    pub async fn cleanup_keep_latest(&self, keep: i64) -> DbResult<(i64, i64)> {
        let mut tx = self.pool.begin().await?;

        let doomed = r#"
            SELECT id FROM (
              SELECT id,
                ROW_NUMBER() OVER (
                  PARTITION BY symbol, timeframe ORDER BY analysis_date DESC, id DESC
                ) AS rn
              FROM analysis_reports
            )
            WHERE rn > ?
        "#;

        sqlx::query(&format!(
            "DELETE FROM trigger_patterns WHERE report_id IN ({doomed})"
        ))
        .bind(keep)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query(&format!("DELETE FROM analysis_reports WHERE id IN ({doomed})"))
            .bind(keep)
            .execute(&mut *tx)
            .await?
            .rows_affected() as i64;

        let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM analysis_reports")
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(deleted, remaining, keep, "Cleaned up old reports");
        Ok((deleted, remaining))
    }

    /// Reclaim disk space after deletes
    pub async fn vacuum(&self) -> DbResult<()> {
        sqlx::query("VACUUM").execute(self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn make_report(symbol: &str, date: &str, fingerprint: &str, best: f64) -> ReportRecord {
        ReportRecord {
            id: None,
            fingerprint: fingerprint.to_string(),
            symbol: symbol.to_string(),
            timeframe: "1h".to_string(),
            analysis_date: date.to_string(),
            entries_analyzed: 12,
            candles_analyzed: 500,
            triggers_found: 3,
            average_success_rate: best / 2.0,
            best_success_rate: best,
            config_json: "{}".to_string(),
            report_json: format!(r#"{{"symbol":"{symbol}"}}"#),
            created_at: None,
        }
    }

    fn make_pattern(symbol: &str, rank: i64, key: &str, rate: f64, total: i64) -> PatternRecord {
        PatternRecord {
            id: None,
            report_id: 0,
            rank,
            symbol: symbol.to_string(),
            timeframe: "1h".to_string(),
            pattern_key: key.to_string(),
            direction: "long".to_string(),
            description: format!("LONG {key}"),
            occurrences: 2,
            total_occurrences: total,
            successful_occurrences: (rate * total as f64).round() as i64,
            success_rate: rate,
            average_profit: 0.01,
            conditions_json: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_and_fetch_report() {
        let db = Database::in_memory().await.unwrap();
        let repo = ReportRepository::new(db.pool());

        let patterns = vec![
            make_pattern("BTCUSDT", 1, "a", 0.8, 10),
            make_pattern("BTCUSDT", 2, "b", 0.5, 6),
        ];
        let id = repo
            .save_report(&make_report("BTCUSDT", "2024-01-01T00:00:00Z", "fp1", 0.8), &patterns)
            .await
            .unwrap();

        let stored = repo.get_report(id).await.unwrap().unwrap();
        assert_eq!(stored.symbol, "BTCUSDT");
        assert_eq!(stored.candles_analyzed, 500);
        assert_eq!(stored.report_value().unwrap()["symbol"], "BTCUSDT");

        let stored_patterns = repo.get_patterns_for_report(id).await.unwrap();
        assert_eq!(stored_patterns.len(), 2);
        assert_eq!(stored_patterns[0].pattern_key, "a");
        assert!(stored_patterns.iter().all(|p| p.report_id == id));
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_returns_existing_id() {
        let db = Database::in_memory().await.unwrap();
        let repo = ReportRepository::new(db.pool());
        let report = make_report("BTCUSDT", "2024-01-01T00:00:00Z", "same", 0.7);
        let patterns = vec![make_pattern("BTCUSDT", 1, "a", 0.7, 10)];

        let first = repo.save_report(&report, &patterns).await.unwrap();
        let second = repo.save_report(&report, &patterns).await.unwrap();
        assert_eq!(first, second);

        let stats = repo.get_stats().await.unwrap();
        assert_eq!(stats.total_reports, 1);
        assert_eq!(stats.total_patterns, 1);
    }

    #[tokio::test]
    async fn test_latest_and_listing() {
        let db = Database::in_memory().await.unwrap();
        let repo = ReportRepository::new(db.pool());

        for (i, symbol) in ["BTCUSDT", "ETHUSDT", "BTCUSDT"].iter().enumerate() {
            let date = format!("2024-01-0{}T00:00:00Z", i + 1);
            repo.save_report(&make_report(symbol, &date, &format!("fp{i}"), 0.5), &[])
                .await
                .unwrap();
        }

        let latest = repo.get_latest(None, None).await.unwrap().unwrap();
        assert_eq!(latest.analysis_date, "2024-01-03T00:00:00Z");
        let latest_eth = repo.get_latest(Some("ETHUSDT"), Some("1h")).await.unwrap().unwrap();
        assert_eq!(latest_eth.fingerprint, "fp1");
        assert!(repo.get_latest(Some("XRPUSDT"), None).await.unwrap().is_none());

        let (page, total) = repo.list_reports(2, 0, None).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].fingerprint, "fp2");

        let (btc, btc_total) = repo.list_reports(10, 0, Some("BTCUSDT")).await.unwrap();
        assert_eq!(btc_total, 2);
        assert!(btc.iter().all(|r| r.symbol == "BTCUSDT"));
    }

    #[tokio::test]
    async fn test_top_patterns_use_latest_report_only() {
        let db = Database::in_memory().await.unwrap();
        let repo = ReportRepository::new(db.pool());

        repo.save_report(
            &make_report("BTCUSDT", "2024-01-01T00:00:00Z", "old", 0.9),
            &[make_pattern("BTCUSDT", 1, "stale", 0.9, 20)],
        )
        .await
        .unwrap();
        repo.save_report(
            &make_report("BTCUSDT", "2024-02-01T00:00:00Z", "new", 0.6),
            &[
                make_pattern("BTCUSDT", 1, "fresh", 0.6, 20),
                make_pattern("BTCUSDT", 2, "rare", 1.0, 1),
            ],
        )
        .await
        .unwrap();
        repo.save_report(
            &make_report("ETHUSDT", "2024-02-01T00:00:00Z", "eth", 0.7),
            &[make_pattern("ETHUSDT", 1, "eth-a", 0.7, 8)],
        )
        .await
        .unwrap();

        let top = repo.get_top_patterns(10, None, 5).await.unwrap();
        let keys: Vec<&str> = top.iter().map(|p| p.pattern_key.as_str()).collect();
        assert_eq!(keys, vec!["eth-a", "fresh"]);

        let btc = repo.get_top_patterns(10, Some("BTCUSDT"), 1).await.unwrap();
        let keys: Vec<&str> = btc.iter().map(|p| p.pattern_key.as_str()).collect();
        assert_eq!(keys, vec!["rare", "fresh"]);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_latest_per_pair() {
        let db = Database::in_memory().await.unwrap();
        let repo = ReportRepository::new(db.pool());

        for day in 1..=4 {
            let date = format!("2024-01-0{day}T00:00:00Z");
            repo.save_report(
                &make_report("BTCUSDT", &date, &format!("btc{day}"), 0.5),
                &[make_pattern("BTCUSDT", 1, "k", 0.5, 4)],
            )
            .await
            .unwrap();
        }
        repo.save_report(&make_report("ETHUSDT", "2024-01-01T00:00:00Z", "eth", 0.5), &[])
            .await
            .unwrap();

        let (deleted, remaining) = repo.cleanup_keep_latest(2).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(remaining, 3);

        let stats = repo.get_stats().await.unwrap();
        assert_eq!(stats.total_patterns, 2);
        let (btc, _) = repo.list_reports(10, 0, Some("BTCUSDT")).await.unwrap();
        let kept: Vec<&str> = btc.iter().map(|r| r.fingerprint.as_str()).collect();
        assert_eq!(kept, vec!["btc4", "btc3"]);

        repo.vacuum().await.unwrap();
    }

    #[tokio::test]
    async fn test_stats_on_empty_store() {
        let db = Database::in_memory().await.unwrap();
        let stats = ReportRepository::new(db.pool()).get_stats().await.unwrap();
        assert_eq!(stats.total_reports, 0);
        assert_eq!(stats.best_pattern, "N/A");
        assert!(stats.last_analysis_date.is_none());
    }
}
