//! Error taxonomy for the analysis pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SeriesError;

/// Which external collaborator failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraStage {
    Fetch,
    Store,
}

impl std::fmt::Display for InfraStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfraStage::Fetch => write!(f, "market data fetch"),
            InfraStage::Store => write!(f, "report store"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid analysis config: {0}")]
    InvalidConfig(String),

    #[error("Invalid candle series: {0}")]
    InvalidSeries(#[from] SeriesError),

    #[error("Analysis cancelled")]
    Cancelled,

    /// The blocking analysis task panicked or was aborted
    #[error("Analysis task failed: {0}")]
    TaskFailed(String),

    /// Failure of a collaborator outside the computational core. Never retried here.
    #[error("Infrastructure failure during {stage}: {message}")]
    Infrastructure { stage: InfraStage, message: String },
}

impl AnalysisError {
    pub fn fetch(err: impl std::fmt::Display) -> Self {
        Self::Infrastructure {
            stage: InfraStage::Fetch,
            message: err.to_string(),
        }
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Infrastructure {
            stage: InfraStage::Store,
            message: err.to_string(),
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Infrastructure { .. })
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
