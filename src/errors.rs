//! Structured error types for simulation and analysis
//!
//! Every error is local to a single trial. Codes are stable and machine-readable so the
//! Monte Carlo harness can record a failed trial without keeping the whole error around.

use serde::{Deserialize, Serialize};

/// Serializable summary of an error, attached to failed trial rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,
}

/// Errors from population handling, statistical analysis and the trial harness
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    /// A group or outcome column was addressed before its pipeline stage produced it
    #[error("Missing column '{0}' in population")]
    MissingColumn(String),

    /// One analysis arm has no rows
    #[error("Group '{0}' has 0 rows. Check the group labels and split")]
    EmptyGroup(String),

    /// Neither arm label matched any row
    #[error("No rows found for SRM check")]
    EmptyPopulation,

    /// Pooled standard error is exactly zero (outcome constant in both arms)
    #[error("Pooled standard error is 0 (pooled rate {pooled_rate}). Check if outcomes are constant")]
    DegenerateVariance { pooled_rate: f64 },

    /// Unknown hypothesis-test direction
    #[error("Invalid alternative '{0}': must be 'greater', 'less', or 'two-sided'")]
    InvalidAlternative(String),

    /// A configuration value is out of its valid range
    #[error("Invalid config for field '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Distribution construction or evaluation failed
    #[error("Statistical error: {0}")]
    Statistical(String),
}

impl SimError {
    /// Create an invalid-config error
    pub fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Get error code for identification in trial rows and logs
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingColumn(_) => "MISSING_COLUMN",
            Self::EmptyGroup(_) => "EMPTY_GROUP",
            Self::EmptyPopulation => "EMPTY_POPULATION",
            Self::DegenerateVariance { .. } => "DEGENERATE_VARIANCE",
            Self::InvalidAlternative(_) => "INVALID_ALTERNATIVE",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Statistical(_) => "STATISTICAL_ERROR",
        }
    }

    /// Whether the error comes from the data of one trial rather than from the caller
    ///
    /// Data errors may be recorded by the harness; caller errors always abort.
    pub fn is_trial_local(&self) -> bool {
        matches!(
            self,
            Self::EmptyGroup(_) | Self::EmptyPopulation | Self::DegenerateVariance { .. }
        )
    }

    /// Convert to a serializable summary
    pub fn to_summary(&self) -> ErrorSummary {
        ErrorSummary {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<statrs::StatsError> for SimError {
    fn from(err: statrs::StatsError) -> Self {
        Self::Statistical(err.to_string())
    }
}

/// Type alias for Results using SimError
pub type Result<T> = std::result::Result<T, SimError>;
