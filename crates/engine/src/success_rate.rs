//! Success-rate replay of trigger patterns across the full history
//!
//! Every pattern is tested against every bar of the series, not only against the
//! entries that formed it. A matching bar is an occurrence; it is successful when
//! the close-to-close return over the short horizon beats the configured
//! threshold.
//!
//! This is the expensive stage: O(patterns × bars). Snapshots come from the
//! run's shared [`IndicatorTable`] instead of being recomputed per pattern, and
//! patterns are replayed in parallel since each one only reads the table.

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::indicators::IndicatorTable;
use crate::patterns::TriggerPattern;
use crate::types::{CandleSeries, Direction};

/// Final statistic for one trigger pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessRateRecord {
    pub pattern: TriggerPattern,
    /// `successful_occurrences / total_occurrences`, 0 when the pattern never recurs
    pub success_rate: f64,
    pub total_occurrences: usize,
    pub successful_occurrences: usize,
    /// Mean short-horizon return over all occurrences
    pub average_profit: f64,
}

/// Close-to-close return from `i` to `i + window`, signed for `direction`.
/// `None` if the horizon runs past the end of the series.
pub fn forward_return(
    series: &CandleSeries,
    i: usize,
    window: usize,
    direction: Direction,
) -> Option<f64> {
    let candles = series.candles();
    if i + window >= candles.len() {
        return None;
    }
    let entry = candles[i].close;
    let exit = candles[i + window].close;
    let ret = (exit - entry) / entry;
    Some(match direction {
        Direction::Long => ret,
        Direction::Short => -ret,
    })
}

/// Replay one pattern over every bar that has a full short horizon ahead of it
pub fn replay_pattern(
    pattern: &TriggerPattern,
    series: &CandleSeries,
    table: &IndicatorTable,
    config: &AnalysisConfig,
) -> SuccessRateRecord {
    let window = config.short_term_profit_window;
    let direction = pattern.conditions.direction;
    let end = series.len().saturating_sub(window);

    let mut total = 0usize;
    let mut successful = 0usize;
    let mut return_sum = 0.0;

    for i in config.min_lookback..end {
        if !pattern.conditions.matches(&table.snapshot(i), direction) {
            continue;
        }
        let Some(ret) = forward_return(series, i, window, direction) else {
            continue;
        };
        total += 1;
        return_sum += ret;
        if ret > config.short_term_profit_threshold {
            successful += 1;
        }
    }

    let (success_rate, average_profit) = if total == 0 {
        (0.0, 0.0)
    } else {
        (
            successful as f64 / total as f64,
            return_sum / total as f64,
        )
    };

    SuccessRateRecord {
        pattern: pattern.clone(),
        success_rate,
        total_occurrences: total,
        successful_occurrences: successful,
        average_profit,
    }
}

/// Replay every pattern, in parallel, keeping the input order.
///
/// Returns [`AnalysisError::Cancelled`] once `cancel` is raised; patterns not
/// yet started are skipped.
pub fn calculate_success_rates(
    patterns: &[TriggerPattern],
    series: &CandleSeries,
    table: &IndicatorTable,
    config: &AnalysisConfig,
    cancel: &AtomicBool,
) -> Result<Vec<SuccessRateRecord>, AnalysisError> {
    let records = patterns
        .par_iter()
        .map(|pattern| {
            if cancel.load(Ordering::Relaxed) {
                return Err(AnalysisError::Cancelled);
            }
            Ok(replay_pattern(pattern, series, table, config))
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        symbol = series.symbol(),
        patterns = records.len(),
        bars = series.len(),
        "Success-rate replay complete"
    );

    Ok(records)
}
