//! Database schema definitions
//!
//! Rates and profits are fractions stored as REAL. The full report body is kept
//! as JSON next to the columns the listings filter and sort on.

/// Statements run in order on every open; all of them are idempotent
pub const STATEMENTS: &[&str] = &[
    // One row per analysis run of a (symbol, timeframe) pair
    r#"
    CREATE TABLE IF NOT EXISTS analysis_reports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fingerprint TEXT NOT NULL UNIQUE,
        symbol TEXT NOT NULL,
        timeframe TEXT NOT NULL,
        analysis_date TEXT NOT NULL,
        entries_analyzed INTEGER NOT NULL DEFAULT 0,
        candles_analyzed INTEGER NOT NULL DEFAULT 0,
        triggers_found INTEGER NOT NULL DEFAULT 0,
        average_success_rate REAL NOT NULL DEFAULT 0,
        best_success_rate REAL NOT NULL DEFAULT 0,
        config_json TEXT NOT NULL,
        report_json TEXT NOT NULL,
        created_at INTEGER DEFAULT (strftime('%s', 'now'))
    )
    "#,
    // One row per ranked trigger pattern of a report
    r#"
    CREATE TABLE IF NOT EXISTS trigger_patterns (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        report_id INTEGER NOT NULL REFERENCES analysis_reports(id) ON DELETE CASCADE,
        rank INTEGER NOT NULL,
        symbol TEXT NOT NULL,
        timeframe TEXT NOT NULL,
        pattern_key TEXT NOT NULL,
        direction TEXT NOT NULL,
        description TEXT NOT NULL,
        occurrences INTEGER NOT NULL DEFAULT 0,
        total_occurrences INTEGER NOT NULL DEFAULT 0,
        successful_occurrences INTEGER NOT NULL DEFAULT 0,
        success_rate REAL NOT NULL DEFAULT 0,
        average_profit REAL NOT NULL DEFAULT 0,
        conditions_json TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_reports_symbol ON analysis_reports(symbol, timeframe, analysis_date DESC)",
    "CREATE INDEX IF NOT EXISTS idx_reports_date ON analysis_reports(analysis_date DESC)",
    "CREATE INDEX IF NOT EXISTS idx_patterns_report ON trigger_patterns(report_id, rank)",
    "CREATE INDEX IF NOT EXISTS idx_patterns_rate ON trigger_patterns(success_rate DESC)",
];
