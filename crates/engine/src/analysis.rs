//! Analysis pipeline runner and multi-symbol batch
//!
//! [`run_analysis`] is the library entry point: one validated series and one
//! configuration in, one [`AnalysisReport`] out. Stages run strictly in order
//! and each consumes the previous stage's value; nothing is cached beyond the
//! run's own [`IndicatorTable`].
//!
//! [`run_batch`] wraps it for several symbols at once. Market data and report
//! storage are reached only through the [`CandleSource`] and [`ReportSink`]
//! seams, so the computational core never blocks on I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{AnalysisConfig, ConfigPreset};
use crate::error::AnalysisError;
use crate::indicators::IndicatorTable;
use crate::patterns::group_entries;
use crate::report::{assemble_report, AnalysisReport};
use crate::scanner::scan_entries;
use crate::success_rate::calculate_success_rates;
use crate::types::CandleSeries;

// ============================================================================
// Single-series pipeline
// ============================================================================

/// Run the full pipeline on one series, stamping the report with the current time
pub fn run_analysis(
    series: &CandleSeries,
    config: &AnalysisConfig,
    cancel: &AtomicBool,
) -> Result<AnalysisReport, AnalysisError> {
    run_analysis_at(series, config, cancel, Utc::now())
}

/// [`run_analysis`] with an explicit analysis date
pub fn run_analysis_at(
    series: &CandleSeries,
    config: &AnalysisConfig,
    cancel: &AtomicBool,
    analysis_date: DateTime<Utc>,
) -> Result<AnalysisReport, AnalysisError> {
    config.validate()?;

    let table = IndicatorTable::compute(series, &config.indicators)?;
    let entries = scan_entries(series, &table, config);

    let mut patterns = group_entries(&entries, config);
    let formed = patterns.len();
    patterns.retain(|p| p.occurrences >= config.min_pattern_occurrences);
    debug!(
        symbol = series.symbol(),
        formed,
        kept = patterns.len(),
        min_occurrences = config.min_pattern_occurrences,
        "Grouped entries into trigger patterns"
    );

    if cancel.load(Ordering::Relaxed) {
        return Err(AnalysisError::Cancelled);
    }

    let records = calculate_success_rates(&patterns, series, &table, config, cancel)?;
    let report = assemble_report(series, &entries, records, config, analysis_date);

    info!(
        symbol = %report.symbol,
        timeframe = %report.timeframe,
        candles = report.candles_analyzed,
        entries = report.entries_analyzed,
        triggers = report.statistics.triggers_found,
        best_success_rate = report.statistics.best_success_rate,
        "Analysis complete"
    );

    Ok(report)
}

// ============================================================================
// Seams
// ============================================================================

/// Market-data collaborator
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Validated candles for `symbol` between `start_time` and `end_time` (ms epoch)
    async fn fetch_series(
        &self,
        symbol: &str,
        timeframe: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<CandleSeries, AnalysisError>;
}

/// Persistence collaborator
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Store a report and return its id
    async fn store_report(&self, report: &AnalysisReport) -> Result<i64, AnalysisError>;
}

// ============================================================================
// Batch request & progress
// ============================================================================

/// Request to analyse one or more symbols on a shared timeframe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub symbols: Vec<String>,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_days")]
    pub days: u32,
    pub preset: Option<ConfigPreset>,
    /// Full configuration; takes precedence over `preset`
    pub config: Option<AnalysisConfig>,
}

fn default_timeframe() -> String {
    "1h".to_string()
}

fn default_days() -> u32 {
    90
}

impl AnalysisRequest {
    pub fn effective_config(&self) -> AnalysisConfig {
        match (&self.config, self.preset) {
            (Some(config), _) => config.clone(),
            (None, Some(preset)) => preset.config(),
            (None, None) => AnalysisConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Idle,
    Running,
    Complete,
    Cancelled,
    Error,
}

/// Result of one symbol inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SymbolOutcome {
    Completed {
        symbol: String,
        report_id: Option<i64>,
        entries_analyzed: usize,
        triggers_found: usize,
        best_success_rate: f64,
        fingerprint: String,
    },
    Failed {
        symbol: String,
        error: String,
        infrastructure: bool,
    },
}

impl SymbolOutcome {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Completed { symbol, .. } | Self::Failed { symbol, .. } => symbol,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    fn failed(symbol: &str, err: &AnalysisError) -> Self {
        Self::Failed {
            symbol: symbol.to_string(),
            error: err.to_string(),
            infrastructure: err.is_infrastructure(),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Shared progress tracker for a batch run
pub struct AnalysisProgress {
    pub status: RwLock<AnalysisStatus>,
    pub current_symbol: RwLock<String>,
    pub total_symbols: AtomicU32,
    pub completed: AtomicU32,
    pub failed: AtomicU32,
    pub cancelled: AtomicBool,
    pub outcomes: RwLock<Vec<SymbolOutcome>>,
    pub errors: RwLock<Vec<String>>,
    pub started_at: RwLock<Option<String>>,
    pub finished_at: RwLock<Option<String>>,
}

/// Point-in-time copy of [`AnalysisProgress`] for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub status: AnalysisStatus,
    pub current_symbol: String,
    pub total_symbols: u32,
    pub completed: u32,
    pub failed: u32,
    pub progress_pct: f32,
    pub outcomes: Vec<SymbolOutcome>,
    pub errors: Vec<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl Default for AnalysisProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(AnalysisStatus::Idle),
            current_symbol: RwLock::new(String::new()),
            total_symbols: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            outcomes: RwLock::new(Vec::new()),
            errors: RwLock::new(Vec::new()),
            started_at: RwLock::new(None),
            finished_at: RwLock::new(None),
        }
    }

    /// Claim the tracker for a new batch.
    ///
    /// Returns `false` and leaves everything untouched if a batch is already
    /// running. The check and the switch to `Running` happen under one write
    /// lock, so of two concurrent callers exactly one wins.
    pub fn try_start(&self, total_symbols: u32) -> bool {
        let mut status = write(&self.status);
        if *status == AnalysisStatus::Running {
            return false;
        }
        *status = AnalysisStatus::Running;

        *write(&self.current_symbol) = String::new();
        self.total_symbols.store(total_symbols, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.cancelled.store(false, Ordering::Relaxed);
        *write(&self.outcomes) = Vec::new();
        *write(&self.errors) = Vec::new();
        *write(&self.started_at) = Some(Utc::now().to_rfc3339());
        *write(&self.finished_at) = None;
        true
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn progress_pct(&self) -> f32 {
        let total = self.total_symbols.load(Ordering::Relaxed);
        let done = self.completed.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32) * 100.0
        }
    }

    pub fn is_running(&self) -> bool {
        *read(&self.status) == AnalysisStatus::Running
    }

    pub fn status(&self) -> AnalysisStatus {
        *read(&self.status)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            status: self.status(),
            current_symbol: read(&self.current_symbol).clone(),
            total_symbols: self.total_symbols.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            progress_pct: self.progress_pct(),
            outcomes: read(&self.outcomes).clone(),
            errors: read(&self.errors).clone(),
            started_at: read(&self.started_at).clone(),
            finished_at: read(&self.finished_at).clone(),
        }
    }

    fn record(&self, outcome: &SymbolOutcome) {
        match outcome {
            SymbolOutcome::Completed { .. } => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            SymbolOutcome::Failed { symbol, error, .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                write(&self.errors).push(format!("{symbol}: {error}"));
            }
        }
        write(&self.outcomes).push(outcome.clone());
    }

    fn finish(&self, status: AnalysisStatus) {
        *write(&self.status) = status;
        *write(&self.current_symbol) = String::new();
        *write(&self.finished_at) = Some(Utc::now().to_rfc3339());
    }
}

// ============================================================================
// Batch runner
// ============================================================================

/// Everything a batch produced, in request symbol order
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub outcomes: Vec<SymbolOutcome>,
    pub reports: Vec<AnalysisReport>,
}

/// Analyse every requested symbol concurrently.
///
/// Symbols are independent: a fetch, validation or store failure is recorded
/// as [`SymbolOutcome::Failed`] for that symbol only. Nothing is retried here.
/// With no `sink` the reports are returned but not stored.
///
/// The caller claims `progress` with [`AnalysisProgress::try_start`] first; a
/// cancel requested after that point is honoured.
pub async fn run_batch(
    request: AnalysisRequest,
    source: Arc<dyn CandleSource>,
    sink: Option<Arc<dyn ReportSink>>,
    progress: Arc<AnalysisProgress>,
) -> BatchOutput {
    let config = Arc::new(request.effective_config());

    info!(
        symbols = ?request.symbols,
        timeframe = %request.timeframe,
        days = request.days,
        preset = ?request.preset,
        "Starting entry discovery batch"
    );

    if let Err(e) = config.validate() {
        warn!(error = %e, "Rejected batch configuration");
        write(&progress.errors).push(e.to_string());
        progress.finish(AnalysisStatus::Error);
        return BatchOutput::default();
    }

    let end_time = Utc::now().timestamp_millis();
    let start_time = end_time - request.days as i64 * 24 * 60 * 60 * 1000;

    let mut tasks = JoinSet::new();
    for (idx, symbol) in request.symbols.iter().enumerate() {
        let job = SymbolJob {
            symbol: symbol.clone(),
            timeframe: request.timeframe.clone(),
            start_time,
            end_time,
            config: Arc::clone(&config),
        };
        let source = Arc::clone(&source);
        let sink = sink.clone();
        let progress = Arc::clone(&progress);
        tasks.spawn(async move {
            let (outcome, report) = analyze_symbol(job, source, sink, &progress).await;
            progress.record(&outcome);
            (idx, outcome, report)
        });
    }

    let mut finished: HashMap<usize, (SymbolOutcome, Option<AnalysisReport>)> = HashMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, outcome, report)) => {
                finished.insert(idx, (outcome, report));
            }
            Err(e) => warn!(error = %e, "Symbol task aborted"),
        }
    }

    let mut output = BatchOutput::default();
    for (idx, symbol) in request.symbols.iter().enumerate() {
        match finished.remove(&idx) {
            Some((outcome, report)) => {
                output.outcomes.push(outcome);
                output.reports.extend(report);
            }
            None => {
                let outcome = SymbolOutcome::failed(
                    symbol,
                    &AnalysisError::TaskFailed("symbol task aborted".to_string()),
                );
                progress.record(&outcome);
                output.outcomes.push(outcome);
            }
        }
    }

    let completed = output.outcomes.iter().filter(|o| o.is_completed()).count();
    let status = if progress.is_cancelled() {
        AnalysisStatus::Cancelled
    } else if completed == 0 && !output.outcomes.is_empty() {
        AnalysisStatus::Error
    } else {
        AnalysisStatus::Complete
    };
    progress.finish(status);

    info!(
        completed,
        failed = output.outcomes.len() - completed,
        status = ?status,
        "Entry discovery batch finished"
    );

    output
}

struct SymbolJob {
    symbol: String,
    timeframe: String,
    start_time: i64,
    end_time: i64,
    config: Arc<AnalysisConfig>,
}

async fn analyze_symbol(
    job: SymbolJob,
    source: Arc<dyn CandleSource>,
    sink: Option<Arc<dyn ReportSink>>,
    progress: &Arc<AnalysisProgress>,
) -> (SymbolOutcome, Option<AnalysisReport>) {
    let symbol = job.symbol.clone();
    match analyze_and_store(job, source, sink, progress).await {
        Ok((report, report_id)) => {
            let outcome = SymbolOutcome::Completed {
                symbol,
                report_id,
                entries_analyzed: report.entries_analyzed,
                triggers_found: report.statistics.triggers_found,
                best_success_rate: report.statistics.best_success_rate,
                fingerprint: report.fingerprint.clone(),
            };
            (outcome, Some(report))
        }
        Err(e) => {
            warn!(symbol = %symbol, error = %e, "Symbol analysis failed, skipping");
            (SymbolOutcome::failed(&symbol, &e), None)
        }
    }
}

async fn analyze_and_store(
    job: SymbolJob,
    source: Arc<dyn CandleSource>,
    sink: Option<Arc<dyn ReportSink>>,
    progress: &Arc<AnalysisProgress>,
) -> Result<(AnalysisReport, Option<i64>), AnalysisError> {
    if progress.is_cancelled() {
        return Err(AnalysisError::Cancelled);
    }
    *write(&progress.current_symbol) = job.symbol.clone();

    let series = source
        .fetch_series(&job.symbol, &job.timeframe, job.start_time, job.end_time)
        .await?;
    info!(symbol = %job.symbol, bars = series.len(), "Fetched candles");

    let config = Arc::clone(&job.config);
    let task_progress = Arc::clone(progress);
    let report = tokio::task::spawn_blocking(move || {
        run_analysis(&series, &config, &task_progress.cancelled)
    })
    .await
    .map_err(|e| AnalysisError::TaskFailed(e.to_string()))??;

    let report_id = match &sink {
        Some(sink) => Some(sink.store_report(&report).await?),
        None => None,
    };

    Ok((report, report_id))
}
