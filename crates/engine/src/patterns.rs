//! Trigger pattern extraction and grouping
//!
//! Each entry's indicator snapshot is reduced to a small set of discrete
//! conditions. Entries whose conditions agree (RSI within the tolerance of the
//! pattern's anchor RSI, and identical MACD / volume / Bollinger states) are
//! folded into the same [`TriggerPattern`].
//!
//! Grouping is a single pass with a linear scan over the known patterns, first
//! match wins. That is O(entries × patterns): fine for tens of thousands of
//! candles, quadratic in the worst case where every entry opens a new pattern.

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::indicators::IndicatorSnapshot;
use crate::scanner::Entry;
use crate::types::Direction;

// ============================================================================
// Discrete conditions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdCondition {
    BullishCross,
    BearishCross,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeCondition {
    HighVolume,
    NormalVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BollingerCondition {
    UpperBand,
    Mid,
    LowerBand,
}

impl MacdCondition {
    pub fn from_snapshot(snapshot: &IndicatorSnapshot) -> Self {
        if snapshot.macd_crossover {
            Self::BullishCross
        } else {
            Self::BearishCross
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BullishCross => "bullish_cross",
            Self::BearishCross => "bearish_cross",
        }
    }
}

impl VolumeCondition {
    pub fn from_snapshot(snapshot: &IndicatorSnapshot, high_ratio: f64) -> Self {
        if snapshot.volume_ratio > high_ratio {
            Self::HighVolume
        } else {
            Self::NormalVolume
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighVolume => "high_volume",
            Self::NormalVolume => "normal_volume",
        }
    }
}

impl BollingerCondition {
    pub fn from_position(position: f64, lower_zone: f64, upper_zone: f64) -> Self {
        if position >= upper_zone {
            Self::UpperBand
        } else if position <= lower_zone {
            Self::LowerBand
        } else {
            Self::Mid
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpperBand => "upper_band",
            Self::Mid => "mid",
            Self::LowerBand => "lower_band",
        }
    }
}

/// Fixed-width RSI range `[low, high)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsiBucket {
    pub low: u32,
    pub high: u32,
}

impl RsiBucket {
    pub fn for_value(rsi: f64, width: u32) -> Self {
        let width = width.clamp(1, 100);
        let clamped = rsi.clamp(0.0, 100.0) as u32;
        let low = (clamped / width * width).min(100 - width);
        Self {
            low,
            high: low + width,
        }
    }
}

/// Discretized indicator descriptor shared by every entry of one pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConditions {
    pub direction: Direction,
    /// RSI of the entry that opened the pattern
    pub rsi_anchor: f64,
    pub rsi_tolerance: f64,
    pub rsi_bucket: RsiBucket,
    pub macd: MacdCondition,
    pub volume: VolumeCondition,
    pub bollinger: BollingerCondition,
    /// Thresholds the categorical conditions were derived with
    pub volume_high_ratio: f64,
    pub bollinger_lower_zone: f64,
    pub bollinger_upper_zone: f64,
}

impl TriggerConditions {
    pub fn from_snapshot(
        snapshot: &IndicatorSnapshot,
        direction: Direction,
        config: &AnalysisConfig,
    ) -> Self {
        let ind = &config.indicators;
        Self {
            direction,
            rsi_anchor: snapshot.rsi,
            rsi_tolerance: config.rsi_tolerance,
            rsi_bucket: RsiBucket::for_value(snapshot.rsi, config.rsi_bucket_width),
            macd: MacdCondition::from_snapshot(snapshot),
            volume: VolumeCondition::from_snapshot(snapshot, config.volume_high_ratio),
            bollinger: BollingerCondition::from_position(
                snapshot.bollinger_position,
                ind.bollinger_lower_zone,
                ind.bollinger_upper_zone,
            ),
            volume_high_ratio: config.volume_high_ratio,
            bollinger_lower_zone: ind.bollinger_lower_zone,
            bollinger_upper_zone: ind.bollinger_upper_zone,
        }
    }

    /// Strict similarity test: all four conditions must agree.
    ///
    /// Used both to group entries and to recognise recurrences during replay.
    pub fn matches(&self, snapshot: &IndicatorSnapshot, direction: Direction) -> bool {
        direction == self.direction
            && (snapshot.rsi - self.rsi_anchor).abs() <= self.rsi_tolerance
            && MacdCondition::from_snapshot(snapshot) == self.macd
            && VolumeCondition::from_snapshot(snapshot, self.volume_high_ratio) == self.volume
            && BollingerCondition::from_position(
                snapshot.bollinger_position,
                self.bollinger_lower_zone,
                self.bollinger_upper_zone,
            ) == self.bollinger
    }

    pub fn matches_entry(&self, entry: &Entry) -> bool {
        self.matches(&entry.snapshot, entry.direction)
    }

    /// Stable text key, used for ordering ties and as the stored pattern key
    pub fn key(&self) -> String {
        format!(
            "{}|rsi:{}-{}@{:.4}|{}|{}|{}",
            self.direction,
            self.rsi_bucket.low,
            self.rsi_bucket.high,
            self.rsi_anchor,
            self.macd.as_str(),
            self.volume.as_str(),
            self.bollinger.as_str()
        )
    }

    pub fn describe(&self) -> String {
        let volume = match self.volume {
            VolumeCondition::HighVolume => "high volume",
            VolumeCondition::NormalVolume => "normal volume",
        };
        let bands = match self.bollinger {
            BollingerCondition::UpperBand => "near upper Bollinger band",
            BollingerCondition::Mid => "mid Bollinger range",
            BollingerCondition::LowerBand => "near lower Bollinger band",
        };
        let macd = match self.macd {
            MacdCondition::BullishCross => "MACD above signal",
            MacdCondition::BearishCross => "MACD below signal",
        };
        format!(
            "{} when RSI {}-{} (~{:.1}), {}, {}, {}",
            self.direction,
            self.rsi_bucket.low,
            self.rsi_bucket.high,
            self.rsi_anchor,
            macd,
            volume,
            bands
        )
    }
}

// ============================================================================
// Trigger patterns
// ============================================================================

/// Back-reference to an entry that joined a pattern
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternInstance {
    pub timestamp: i64,
    pub profit: f64,
}

/// A recurring group of similar entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPattern {
    pub conditions: TriggerConditions,
    pub occurrences: usize,
    pub instances: Vec<PatternInstance>,
    pub total_profit: f64,
}

impl TriggerPattern {
    fn open(entry: &Entry, config: &AnalysisConfig) -> Self {
        let mut pattern = Self {
            conditions: TriggerConditions::from_snapshot(&entry.snapshot, entry.direction, config),
            occurrences: 0,
            instances: Vec::new(),
            total_profit: 0.0,
        };
        pattern.record(entry);
        pattern
    }

    fn record(&mut self, entry: &Entry) {
        self.occurrences += 1;
        self.total_profit += entry.profit;
        self.instances.push(PatternInstance {
            timestamp: entry.timestamp,
            profit: entry.profit,
        });
    }

    /// Mean profit of the entries that formed this pattern
    pub fn average_profit(&self) -> f64 {
        if self.occurrences == 0 {
            0.0
        } else {
            self.total_profit / self.occurrences as f64
        }
    }
}

/// Fold entries into trigger patterns in entry order.
///
/// Each entry joins the first existing pattern it matches (not the closest one),
/// otherwise it opens a new pattern anchored on its own snapshot.
pub fn group_entries(entries: &[Entry], config: &AnalysisConfig) -> Vec<TriggerPattern> {
    let mut patterns: Vec<TriggerPattern> = Vec::new();

    for entry in entries {
        match patterns
            .iter_mut()
            .find(|p| p.conditions.matches_entry(entry))
        {
            Some(pattern) => pattern.record(entry),
            None => patterns.push(TriggerPattern::open(entry, config)),
        }
    }

    patterns
}
