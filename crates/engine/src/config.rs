//! Analysis configuration and named presets
//!
//! One configuration object drives every stage of the pipeline. The presets
//! capture the scalp / swing / position variants of the discovery run.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::AnalysisError;

// ============================================================================
// Indicator settings
// ============================================================================

/// Lookback windows and thresholds for the indicator bank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub ema_fast: usize,
    pub ema_mid: usize,
    pub ema_slow: usize,
    pub bollinger_period: usize,
    pub bollinger_multiplier: f64,
    pub atr_period: usize,
    pub stochastic_period: usize,
    pub volume_period: usize,
    pub support_resistance_lookback: usize,
    /// Fractional distance from support/resistance that counts as "near"
    pub support_resistance_proximity: f64,
    /// Bollinger position at or below this is the lower band zone
    pub bollinger_lower_zone: f64,
    /// Bollinger position at or above this is the upper band zone
    pub bollinger_upper_zone: f64,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            ema_fast: 9,
            ema_mid: 21,
            ema_slow: 50,
            bollinger_period: 20,
            bollinger_multiplier: 2.0,
            atr_period: 14,
            stochastic_period: 14,
            volume_period: 20,
            support_resistance_lookback: 20,
            support_resistance_proximity: 0.02,
            bollinger_lower_zone: 0.2,
            bollinger_upper_zone: 0.8,
        }
    }
}

impl IndicatorSettings {
    /// Longest lookback any indicator in the bank needs before it leaves its neutral default
    pub fn longest_lookback(&self) -> usize {
        [
            self.rsi_period + 1,
            self.macd_slow + self.macd_signal - 1,
            self.ema_slow,
            self.bollinger_period,
            self.atr_period,
            self.stochastic_period,
            self.volume_period,
            self.support_resistance_lookback,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

// ============================================================================
// Analysis configuration
// ============================================================================

/// Unified configuration for one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum favourable excursion (fraction) for an index to count as an entry
    pub min_profit_threshold: f64,
    /// Maximum adverse excursion (fraction) tolerated inside the lookforward window
    pub max_drawdown_threshold: f64,
    pub lookforward_bars: usize,
    /// First index the scanner considers
    pub min_lookback: usize,
    /// Also label short entries with inverted profit/drawdown roles
    pub include_short: bool,
    /// Width of the RSI bucket named in pattern keys and descriptions.
    /// Display only: grouping and replay match on `rsi_tolerance`.
    pub rsi_bucket_width: u32,
    /// Maximum RSI distance between two snapshots of the same pattern
    pub rsi_tolerance: f64,
    pub volume_high_ratio: f64,
    pub short_term_profit_window: usize,
    pub short_term_profit_threshold: f64,
    /// Patterns formed by fewer entries are dropped before replay
    pub min_pattern_occurrences: usize,
    pub top_patterns_count: usize,
    pub top_entries_count: usize,
    pub indicators: IndicatorSettings,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_profit_threshold: 0.05,
            max_drawdown_threshold: 0.02,
            lookforward_bars: 10,
            min_lookback: 50,
            include_short: false,
            rsi_bucket_width: 10,
            rsi_tolerance: 5.0,
            volume_high_ratio: 1.5,
            short_term_profit_window: 10,
            short_term_profit_threshold: 0.01,
            min_pattern_occurrences: 1,
            top_patterns_count: 20,
            top_entries_count: 100,
            indicators: IndicatorSettings::default(),
        }
    }
}

impl AnalysisConfig {
    /// Shortest series for which the scanner can produce any entry
    pub fn min_bars_required(&self) -> usize {
        self.min_lookback + self.lookforward_bars + 1
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        let invalid = |msg: &str| Err(AnalysisError::InvalidConfig(msg.to_string()));

        if !(self.min_profit_threshold > 0.0) {
            return invalid("min_profit_threshold must be > 0");
        }
        if !(self.max_drawdown_threshold >= 0.0) {
            return invalid("max_drawdown_threshold must be >= 0");
        }
        if self.lookforward_bars == 0 {
            return invalid("lookforward_bars must be >= 1");
        }
        if self.short_term_profit_window == 0 {
            return invalid("short_term_profit_window must be >= 1");
        }
        if self.rsi_bucket_width == 0 || self.rsi_bucket_width > 100 {
            return invalid("rsi_bucket_width must be in 1..=100");
        }
        if !(self.rsi_tolerance >= 0.0) {
            return invalid("rsi_tolerance must be >= 0");
        }
        if !(self.volume_high_ratio > 0.0) {
            return invalid("volume_high_ratio must be > 0");
        }
        if self.min_pattern_occurrences == 0 {
            return invalid("min_pattern_occurrences must be >= 1");
        }

        let ind = &self.indicators;
        let periods = [
            ind.rsi_period,
            ind.macd_fast,
            ind.macd_slow,
            ind.macd_signal,
            ind.ema_fast,
            ind.ema_mid,
            ind.ema_slow,
            ind.bollinger_period,
            ind.atr_period,
            ind.stochastic_period,
            ind.volume_period,
            ind.support_resistance_lookback,
        ];
        if periods.iter().any(|&p| p == 0) {
            return invalid("indicator periods must be >= 1");
        }
        if ind.macd_fast >= ind.macd_slow {
            return invalid("macd_fast must be shorter than macd_slow");
        }
        if !(ind.bollinger_multiplier > 0.0) {
            return invalid("bollinger_multiplier must be > 0");
        }
        if !(ind.bollinger_lower_zone < ind.bollinger_upper_zone) {
            return invalid("bollinger_lower_zone must be below bollinger_upper_zone");
        }
        Ok(())
    }
}

// ============================================================================
// Presets
// ============================================================================

/// Named parameter sets for the three horizons the engine is usually run at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigPreset {
    /// Short holding: 2% target, 1% max drawdown, 10 bars ahead
    Scalp,
    /// 5% target, 2% max drawdown, 48 bars ahead
    Swing,
    /// 10% target, 2% max drawdown, 240 bars ahead
    Position,
}

impl ConfigPreset {
    pub fn all() -> &'static [ConfigPreset] {
        &[Self::Scalp, Self::Swing, Self::Position]
    }

    pub fn config(&self) -> AnalysisConfig {
        match self {
            Self::Scalp => AnalysisConfig {
                min_profit_threshold: 0.02,
                max_drawdown_threshold: 0.01,
                lookforward_bars: 10,
                rsi_bucket_width: 5,
                ..Default::default()
            },
            Self::Swing => AnalysisConfig {
                min_profit_threshold: 0.05,
                max_drawdown_threshold: 0.02,
                lookforward_bars: 48,
                ..Default::default()
            },
            Self::Position => AnalysisConfig {
                min_profit_threshold: 0.10,
                max_drawdown_threshold: 0.02,
                lookforward_bars: 240,
                short_term_profit_window: 24,
                ..Default::default()
            },
        }
    }
}

impl std::fmt::Display for ConfigPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigPreset::Scalp => write!(f, "scalp"),
            ConfigPreset::Swing => write!(f, "swing"),
            ConfigPreset::Position => write!(f, "position"),
        }
    }
}

impl FromStr for ConfigPreset {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scalp" => Ok(Self::Scalp),
            "swing" => Ok(Self::Swing),
            "position" => Ok(Self::Position),
            other => Err(AnalysisError::InvalidConfig(format!(
                "unknown preset '{other}' (expected scalp, swing or position)"
            ))),
        }
    }
}
