//! Entry-Discover: historical entry-point and trigger-pattern discovery
//!
//! Usage:
//!   entry-discover serve --port 3001                     Launch the HTTP API
//!   entry-discover run --symbols BTCUSDT --preset swing  Run an analysis from CLI
//!   entry-discover cleanup --keep 3                      Prune old reports
//!   entry-discover presets                               Show preset configurations

mod sink;

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use engine::{
    run_batch, AnalysisConfig, AnalysisProgress, AnalysisReport, AnalysisRequest, AnalysisStatus,
    BinanceClient, CandleSource, ConfigPreset, ProgressSnapshot, ReportSink, SymbolOutcome,
};
use persistence::repository::ReportRepository;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::sink::DbReportSink;

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));
const DEFAULT_DB_PATH: &str = "data/entry_discover.db";

#[derive(Parser)]
#[command(name = "entry-discover")]
#[command(about = "Discover historically profitable entry points and their trigger patterns", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the analysis web server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Run an analysis from CLI (no web server)
    Run(RunArgs),
    /// Cleanup DB: keep the latest N reports per symbol/timeframe, delete the rest
    Cleanup {
        /// Number of reports to keep per (symbol, timeframe)
        #[arg(long, default_value_t = 3)]
        keep: i64,
    },
    /// Print the built-in configuration presets
    Presets,
}

#[derive(Args)]
struct RunArgs {
    /// Symbols to analyse (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "BTCUSDT,ETHUSDT,SOLUSDT,XRPUSDT"
    )]
    symbols: Vec<String>,
    /// Kline interval (1m .. 1w)
    #[arg(long, default_value = "1h")]
    timeframe: String,
    /// Number of days of historical data
    #[arg(long, default_value_t = 90)]
    days: u32,
    /// Preset: scalp, swing, position
    #[arg(long)]
    preset: Option<ConfigPreset>,
    /// Minimum profit for an entry (fraction, 0.05 = 5%)
    #[arg(long)]
    min_profit: Option<f64>,
    /// Maximum drawdown tolerated before the target (fraction)
    #[arg(long)]
    max_drawdown: Option<f64>,
    /// Bars to look ahead when labelling entries
    #[arg(long)]
    lookforward: Option<usize>,
    /// Also label short entries
    #[arg(long)]
    include_short: bool,
    /// Patterns kept per report
    #[arg(long)]
    top_patterns: Option<usize>,
    /// Entries kept per report
    #[arg(long)]
    top_entries: Option<usize>,
    /// Optional JSON export path
    #[arg(long)]
    export: Option<String>,
    /// Do not write reports to the database
    #[arg(long)]
    no_store: bool,
}

impl RunArgs {
    /// Preset (or defaults) with the per-flag overrides applied
    fn config(&self) -> AnalysisConfig {
        let mut config = self.preset.map(|p| p.config()).unwrap_or_default();
        if let Some(v) = self.min_profit {
            config.min_profit_threshold = v;
        }
        if let Some(v) = self.max_drawdown {
            config.max_drawdown_threshold = v;
        }
        if let Some(v) = self.lookforward {
            config.lookforward_bars = v;
        }
        if self.include_short {
            config.include_short = true;
        }
        if let Some(v) = self.top_patterns {
            config.top_patterns_count = v;
        }
        if let Some(v) = self.top_entries {
            config.top_entries_count = v;
        }
        config
    }
}

#[derive(Clone)]
struct AppState {
    binance: Arc<BinanceClient>,
    db: Arc<persistence::Database>,
    progress: Arc<AnalysisProgress>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug,engine=debug,persistence=debug,entry_discover=debug")
        } else {
            EnvFilter::new("info,engine=info,persistence=info,entry_discover=info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn db_path() -> String {
    std::env::var("ENTRY_DISCOVER_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}

async fn open_database(db_path: &str) -> anyhow::Result<persistence::Database> {
    persistence::Database::new(db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&host, port).await?;
        }
        Commands::Run(args) => {
            cmd_run(args).await?;
        }
        Commands::Cleanup { keep } => {
            cmd_cleanup(keep).await?;
        }
        Commands::Presets => {
            cmd_presets()?;
        }
    }

    Ok(())
}

// ============================================================================
// Serve command: Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("Entry-Discover v{} starting...", APP_VERSION);

    let db_path = db_path();
    let db = open_database(&db_path).await?;
    info!("Database initialized: {}", db_path);

    let state = AppState {
        binance: Arc::new(BinanceClient::new()),
        db: Arc::new(db),
        progress: Arc::new(AnalysisProgress::new()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/presets", get(api_presets))
        .route("/analyze", post(api_start_analysis))
        .route("/analyze/status", get(api_analysis_status))
        .route("/analyze/cancel", post(api_cancel_analysis))
        .route("/reports", get(api_reports))
        .route("/reports/latest", get(api_latest_report))
        .route("/reports/:id", get(api_report_by_id))
        .route("/patterns/top", get(api_top_patterns))
        .route("/stats", get(api_stats))
        .route("/binance/klines", get(api_binance_klines))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Entry-Discover v{} ===", APP_VERSION);
    println!("Entry Discovery Server");
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  GET  /api/presets             - Built-in configuration presets");
    println!("  POST /api/analyze             - Start an analysis batch");
    println!("  GET  /api/analyze/status      - Poll analysis progress");
    println!("  POST /api/analyze/cancel      - Cancel running analysis");
    println!("  GET  /api/reports             - Stored reports (paginated)");
    println!("  GET  /api/reports/latest      - Latest full report");
    println!("  GET  /api/reports/:id         - Full report by id");
    println!("  GET  /api/patterns/top        - Best patterns across symbols");
    println!("  GET  /api/stats               - Store statistics");
    println!("  GET  /api/binance/klines      - Fetch Binance klines (proxy)");
    println!("\n  Database: {}", db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Run command: CLI mode (no web server)
// ============================================================================

async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    println!("\n=== Entry-Discover v{} ===", APP_VERSION);

    let config = args.config();
    config.validate()?;

    let sink: Option<Arc<dyn ReportSink>> = if args.no_store {
        println!("Database: disabled (--no-store)");
        None
    } else {
        let db_path = db_path();
        let db = open_database(&db_path).await?;
        let stored = ReportRepository::new(db.pool())
            .get_stats()
            .await
            .map(|s| s.total_reports)
            .unwrap_or(0);
        println!("Database: {} ({} reports stored)", db_path, stored);
        Some(Arc::new(DbReportSink::new(db.pool_clone(), &config)))
    };

    println!("Symbols: {}", args.symbols.join(", "));
    println!(
        "Timeframe: {} | Days: {} | Preset: {} | Target: {:.1}% | Max DD: {:.1}% | Lookforward: {} bars{}",
        args.timeframe,
        args.days,
        args.preset.map(|p| p.to_string()).unwrap_or_else(|| "default".to_string()),
        config.min_profit_threshold * 100.0,
        config.max_drawdown_threshold * 100.0,
        config.lookforward_bars,
        if config.include_short { " | +short" } else { "" },
    );
    println!();

    let request = AnalysisRequest {
        symbols: args.symbols.clone(),
        timeframe: args.timeframe.clone(),
        days: args.days,
        preset: args.preset,
        config: Some(config.clone()),
    };

    let source: Arc<dyn CandleSource> = Arc::new(BinanceClient::new());
    let progress = Arc::new(AnalysisProgress::new());
    progress.try_start(request.symbols.len() as u32);

    let progress_for_ctrlc = progress.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting cancel...");
        progress_for_ctrlc.cancel();
    });

    let progress_clone = progress.clone();
    let handle =
        tokio::spawn(async move { run_batch(request, source, sink, progress_clone).await });

    // Progress display loop
    while !handle.is_finished() {
        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
        let snap = progress.snapshot();
        if snap.status == AnalysisStatus::Running {
            print!(
                "\r  [{:>5.1}%] {}/{} symbols ({} failed) {:<12}",
                snap.progress_pct,
                snap.completed + snap.failed,
                snap.total_symbols,
                snap.failed,
                snap.current_symbol,
            );
            use std::io::Write;
            std::io::stdout().flush().ok();
        }
    }
    println!();

    let output = handle.await?;

    for outcome in &output.outcomes {
        match outcome {
            SymbolOutcome::Completed {
                symbol,
                report_id,
                entries_analyzed,
                triggers_found,
                best_success_rate,
                ..
            } => println!(
                "  OK   {:<10} {} entries, {} patterns, best {:.1}%{}",
                symbol,
                entries_analyzed,
                triggers_found,
                best_success_rate * 100.0,
                report_id.map(|id| format!(" (report #{id})")).unwrap_or_default(),
            ),
            SymbolOutcome::Failed {
                symbol,
                error,
                infrastructure,
            } => println!(
                "  FAIL {:<10} {}{}",
                symbol,
                error,
                if *infrastructure { " [infrastructure]" } else { "" },
            ),
        }
    }

    match progress.status() {
        AnalysisStatus::Cancelled => println!("\nAnalysis cancelled."),
        AnalysisStatus::Error => println!("\nAnalysis failed for every symbol."),
        _ => {}
    }

    for report in &output.reports {
        print_results(report, config.top_patterns_count);
    }

    if let Some(path) = args.export {
        let export = build_export_json(&output.reports, &config);
        std::fs::write(&path, serde_json::to_string_pretty(&export)?)?;
        println!("\nExported {} report(s) to {}", output.reports.len(), path);
    }

    Ok(())
}

fn print_results(report: &AnalysisReport, top_n: usize) {
    let stats = &report.statistics;
    println!(
        "\n{} {}: {} candles, {} entries ({} long / {} short), {} patterns",
        report.symbol,
        report.timeframe,
        report.candles_analyzed,
        stats.entries_analyzed,
        stats.long_entries,
        stats.short_entries,
        stats.triggers_found,
    );
    if report.patterns.is_empty() {
        println!("  No recurring trigger patterns found.");
        return;
    }
    println!(
        "  {:>3}  {:<6} {:>8} {:>7} {:>9}  {}",
        "#", "Dir", "Success", "Occ", "AvgRet", "Conditions"
    );
    println!("  {}", "-".repeat(90));
    for p in report.patterns.iter().take(top_n) {
        println!(
            "  {:>3}  {:<6} {:>7.1}% {:>7} {:>+8.2}%  {}",
            p.rank,
            p.conditions.direction,
            p.success_rate * 100.0,
            p.total_occurrences,
            p.average_profit * 100.0,
            p.description,
        );
    }
}

// ============================================================================
// Presets command
// ============================================================================

fn cmd_presets() -> anyhow::Result<()> {
    for preset in ConfigPreset::all() {
        println!("\n[{}]", preset);
        println!("{}", serde_json::to_string_pretty(&preset.config())?);
    }
    Ok(())
}

// ============================================================================
// API Handlers: Analysis
// ============================================================================

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "entry-discover",
        "version": APP_VERSION,
    }))
}

/// GET /api/presets
async fn api_presets() -> Json<serde_json::Value> {
    let presets: Vec<serde_json::Value> = ConfigPreset::all()
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.to_string(),
                "config": p.config(),
            })
        })
        .collect();
    Json(serde_json::json!({ "presets": presets }))
}

/// POST /api/analyze: start an analysis batch
async fn api_start_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Json<serde_json::Value> {
    let config = match claim_batch(&state.progress, &request) {
        Ok(config) => config,
        Err(message) => {
            return Json(serde_json::json!({
                "success": false,
                "message": message,
            }))
        }
    };

    info!(
        symbols = ?request.symbols,
        timeframe = %request.timeframe,
        days = request.days,
        "Starting analysis via API"
    );

    let source: Arc<dyn CandleSource> = state.binance.clone();
    let sink: Arc<dyn ReportSink> = Arc::new(DbReportSink::new(state.db.pool_clone(), &config));
    let progress = state.progress.clone();
    let symbols = request.symbols.len();

    tokio::spawn(async move {
        run_batch(request, source, Some(sink), progress).await;
    });

    Json(serde_json::json!({
        "success": true,
        "message": "Analysis started",
        "symbols": symbols,
    }))
}

/// Validate the request and claim the shared tracker for it.
///
/// The tracker is only claimed once the request is known to be runnable, so a
/// rejected request never disturbs the status of the previous batch.
fn claim_batch(
    progress: &AnalysisProgress,
    request: &AnalysisRequest,
) -> Result<AnalysisConfig, String> {
    if request.symbols.is_empty() {
        return Err("At least one symbol is required".to_string());
    }
    let config = request.effective_config();
    config.validate().map_err(|e| e.to_string())?;

    if !progress.try_start(request.symbols.len() as u32) {
        return Err(format!(
            "Analysis already running ({:.0}% complete)",
            progress.progress_pct()
        ));
    }
    Ok(config)
}

/// POST /api/analyze/cancel
async fn api_cancel_analysis(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.progress.cancel();
    info!("Analysis cancel requested via API");
    Json(serde_json::json!({
        "success": true,
        "message": "Cancel requested"
    }))
}

/// GET /api/analyze/status: poll analysis progress
async fn api_analysis_status(State(state): State<AppState>) -> Json<ProgressSnapshot> {
    Json(state.progress.snapshot())
}

// ============================================================================
// API Handlers: Stored reports
// ============================================================================

/// GET /api/reports?limit=&offset=&symbol=
async fn api_reports(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit: i64 = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(50)
        .clamp(1, 500);
    let offset: i64 = params
        .get("offset")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
        .max(0);
    let symbol = params.get("symbol").map(String::as_str);

    let repo = ReportRepository::new(state.db.pool());
    match repo.list_reports(limit, offset, symbol).await {
        Ok((reports, total)) => Json(serde_json::json!({
            "success": true,
            "total": total,
            "limit": limit,
            "offset": offset,
            "reports": reports,
        })),
        Err(e) => {
            error!("Failed to list reports: {}", e);
            Json(serde_json::json!({
                "success": false,
                "message": format!("Failed to list reports: {}", e),
            }))
        }
    }
}

/// GET /api/reports/latest?symbol=&timeframe=
async fn api_latest_report(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let symbol = params.get("symbol").map(String::as_str);
    let timeframe = params.get("timeframe").map(String::as_str);

    let repo = ReportRepository::new(state.db.pool());
    match repo.get_latest(symbol, timeframe).await {
        Ok(Some(record)) => report_json(record),
        Ok(None) => Json(serde_json::json!({
            "success": false,
            "message": "No report stored yet",
        })),
        Err(e) => {
            error!("Failed to load latest report: {}", e);
            Json(serde_json::json!({
                "success": false,
                "message": format!("Failed to load report: {}", e),
            }))
        }
    }
}

/// GET /api/reports/:id
async fn api_report_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Json<serde_json::Value> {
    let repo = ReportRepository::new(state.db.pool());
    match repo.get_report(id).await {
        Ok(Some(record)) => report_json(record),
        Ok(None) => Json(serde_json::json!({
            "success": false,
            "message": format!("Report {} not found", id),
        })),
        Err(e) => {
            error!("Failed to load report {}: {}", id, e);
            Json(serde_json::json!({
                "success": false,
                "message": format!("Failed to load report: {}", e),
            }))
        }
    }
}

fn report_json(record: persistence::repository::ReportRecord) -> Json<serde_json::Value> {
    match record.report_value() {
        Ok(report) => Json(serde_json::json!({
            "success": true,
            "id": record.id,
            "created_at": record.created_at,
            "report": report,
        })),
        Err(e) => {
            warn!(id = ?record.id, "Stored report body is unreadable: {}", e);
            Json(serde_json::json!({
                "success": false,
                "message": format!("Stored report is corrupt: {}", e),
            }))
        }
    }
}

/// GET /api/patterns/top?limit=&symbol=&min_occurrences=
async fn api_top_patterns(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit: i64 = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(20)
        .clamp(1, 200);
    let min_occurrences: i64 = params
        .get("min_occurrences")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let symbol = params.get("symbol").map(String::as_str);

    let repo = ReportRepository::new(state.db.pool());
    match repo.get_top_patterns(limit, symbol, min_occurrences).await {
        Ok(patterns) => Json(serde_json::json!({
            "success": true,
            "count": patterns.len(),
            "patterns": patterns,
        })),
        Err(e) => {
            error!("Failed to load top patterns: {}", e);
            Json(serde_json::json!({
                "success": false,
                "message": format!("Failed to load patterns: {}", e),
            }))
        }
    }
}

/// GET /api/stats
async fn api_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let repo = ReportRepository::new(state.db.pool());
    match repo.get_stats().await {
        Ok(stats) => Json(serde_json::json!({
            "success": true,
            "stats": stats,
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "message": format!("Failed to load stats: {}", e),
        })),
    }
}

// ============================================================================
// API Handlers: Binance Proxy
// ============================================================================

/// GET /api/binance/klines: Proxy endpoint for Binance klines
async fn api_binance_klines(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let symbol = params
        .get("symbol")
        .cloned()
        .unwrap_or_else(|| "BTCUSDT".to_string());
    let interval = params
        .get("interval")
        .cloned()
        .unwrap_or_else(|| "1h".to_string());
    let start_time: Option<i64> = params.get("start_time").and_then(|s| s.parse().ok());
    let end_time: Option<i64> = params.get("end_time").and_then(|s| s.parse().ok());
    let limit: Option<u32> = params.get("limit").and_then(|s| s.parse().ok());

    let result = if let (Some(start), Some(end)) = (start_time, end_time) {
        state
            .binance
            .get_klines_paginated(&symbol, &interval, start, end)
            .await
    } else {
        state
            .binance
            .get_klines(&symbol, &interval, start_time, end_time, limit)
            .await
    };

    match result {
        Ok(klines) => Json(serde_json::json!({
            "success": true,
            "symbol": symbol,
            "interval": interval,
            "count": klines.len(),
            "klines": klines,
        })),
        Err(e) => {
            error!("Binance klines error: {}", e);
            Json(serde_json::json!({
                "success": false,
                "message": format!("Failed to fetch klines: {}", e),
            }))
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Build export JSON from in-memory reports (used by CLI run command)
fn build_export_json(reports: &[AnalysisReport], config: &AnalysisConfig) -> serde_json::Value {
    let items: Vec<serde_json::Value> = reports
        .iter()
        .map(|r| {
            serde_json::json!({
                "symbol": r.symbol,
                "timeframe": r.timeframe,
                "fingerprint": r.fingerprint,
                "statistics": r.statistics,
                "patterns": r.patterns,
                "top_entries": r.top_entries,
            })
        })
        .collect();

    serde_json::json!({
        "generated_at": Utc::now().to_rfc3339(),
        "version": APP_VERSION,
        "config": config,
        "total_reports": reports.len(),
        "reports": items,
    })
}

// ============================================================================
// Cleanup command: keep latest N per (symbol, timeframe), delete the rest
// ============================================================================

async fn cmd_cleanup(keep: i64) -> anyhow::Result<()> {
    info!(
        "Entry-Discover DB cleanup: keeping latest {} report(s) per symbol/timeframe",
        keep
    );

    let db_path = db_path();
    let db = open_database(&db_path).await?;
    info!("Database opened: {}", db_path);

    let repo = ReportRepository::new(db.pool());
    let (deleted, remaining) = repo
        .cleanup_keep_latest(keep)
        .await
        .map_err(|e| anyhow::anyhow!("Cleanup failed: {}", e))?;

    info!("Running VACUUM to reclaim disk space...");
    repo.vacuum()
        .await
        .map_err(|e| anyhow::anyhow!("VACUUM failed: {}", e))?;

    info!("Done! Deleted {} reports, {} remaining.", deleted, remaining);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("entry-discover").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_run_defaults() {
        let Commands::Run(args) = parse(&["run"]).command else {
            panic!("expected run");
        };
        assert_eq!(args.symbols, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT"]);
        assert_eq!(args.timeframe, "1h");
        assert_eq!(args.days, 90);
        assert_eq!(args.config(), AnalysisConfig::default());
    }

    #[test]
    fn test_run_flags_override_preset() {
        let Commands::Run(args) = parse(&[
            "run",
            "--symbols",
            "BTCUSDT,ETHUSDT",
            "--preset",
            "position",
            "--min-profit",
            "0.08",
            "--include-short",
            "--top-patterns",
            "5",
        ])
        .command
        else {
            panic!("expected run");
        };

        let config = args.config();
        let position = ConfigPreset::Position.config();
        assert_eq!(args.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(config.min_profit_threshold, 0.08);
        assert_eq!(config.lookforward_bars, position.lookforward_bars);
        assert!(config.include_short);
        assert_eq!(config.top_patterns_count, 5);
    }

    #[test]
    fn test_unknown_preset_is_rejected() {
        let parsed = Cli::try_parse_from(["entry-discover", "run", "--preset", "yolo"]);
        assert!(parsed.is_err());
    }

    fn analyze_request(symbols: &[&str]) -> AnalysisRequest {
        serde_json::from_value(serde_json::json!({ "symbols": symbols })).unwrap()
    }

    #[test]
    fn test_claim_batch_rejects_while_running() {
        let progress = AnalysisProgress::new();
        assert!(claim_batch(&progress, &analyze_request(&["BTCUSDT"])).is_ok());

        let second = claim_batch(&progress, &analyze_request(&["ETHUSDT"]));
        assert!(second.unwrap_err().contains("already running"));
        assert_eq!(progress.snapshot().total_symbols, 1);
    }

    #[test]
    fn test_claim_batch_keeps_cancel_request() {
        let progress = AnalysisProgress::new();
        claim_batch(&progress, &analyze_request(&["BTCUSDT", "ETHUSDT"])).unwrap();
        progress.cancel();
        assert!(progress.is_cancelled());
        assert!(progress.is_running());
    }

    #[test]
    fn test_claim_batch_validates_before_claiming() {
        let progress = AnalysisProgress::new();
        assert!(claim_batch(&progress, &analyze_request(&[])).is_err());

        let mut bad = analyze_request(&["BTCUSDT"]);
        bad.config = Some(AnalysisConfig {
            lookforward_bars: 0,
            ..Default::default()
        });
        assert!(claim_batch(&progress, &bad).is_err());
        assert_eq!(progress.status(), AnalysisStatus::Idle);
    }

    #[test]
    fn test_export_json_shape() {
        let export = build_export_json(&[], &AnalysisConfig::default());
        assert_eq!(export["total_reports"], 0);
        assert!(export["reports"].as_array().unwrap().is_empty());
        assert!(export["config"]["min_profit_threshold"].is_number());
    }
}
