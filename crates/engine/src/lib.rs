//! Entry Discover Engine: historical entry-point and trigger-pattern discovery
//!
//! Given a validated candle series, the engine:
//! - labels historically profitable entry points (Entry Scanner)
//! - reduces their indicator snapshots to discrete trigger conditions and groups them
//! - replays every trigger pattern across the full history for a success rate
//! - ranks the patterns into one structured report
//!
//! Also ships a Binance public API client and a multi-symbol batch runner.

pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod indicators;
pub mod patterns;
pub mod report;
pub mod scanner;
pub mod success_rate;
pub mod types;

// Re-exports for convenience
pub use analysis::{
    run_analysis, run_analysis_at, run_batch, AnalysisProgress, AnalysisRequest, AnalysisStatus,
    BatchOutput, CandleSource, ProgressSnapshot, ReportSink, SymbolOutcome,
};
pub use api::BinanceClient;
pub use config::{AnalysisConfig, ConfigPreset, IndicatorSettings};
pub use error::{AnalysisError, AnalysisResult, InfraStage};
pub use indicators::{IndicatorSnapshot, IndicatorTable};
pub use patterns::{group_entries, TriggerConditions, TriggerPattern};
pub use report::{
    assemble_report, rank_records, AnalysisReport, EntrySummary, PatternSummary,
    ReportStatistics,
};
pub use scanner::{scan_entries, Entry};
pub use success_rate::{calculate_success_rates, SuccessRateRecord};
pub use types::*;
