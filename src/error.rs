//! Error taxonomy for the forecasting pipeline.
//!
//! Every failure the pipeline can hit is a [`ForecastError`]. Request-level
//! failures replace the whole response; per-group failures are attached to the
//! group that produced them. Nothing here is ever raised as a panic.

use thiserror::Error;

/// Number of discovered column names quoted in a schema error.
const LISTED_COLUMNS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForecastError {
    #[error("Could not read CSV: {0}")]
    InvalidInput(String),

    #[error("CSV must contain a {missing}. Found columns: {found}")]
    Schema { missing: String, found: String },

    #[error(
        "Could not parse date column. Please ensure dates are in a recognizable format \
         (YYYY-MM-DD, YYYY-MM, YYYY, MM/DD/YYYY, etc.)"
    )]
    DateParse,

    #[error("insufficient data points: need at least {required} valid rows, got {found}")]
    InsufficientData { required: usize, found: usize },

    #[error("No valid product time series found in CSV.")]
    NoGroups,

    #[error("model fit failed: {0}")]
    ModelFit(String),

    #[error("forecast timed out after {0} seconds")]
    Timeout(u64),
}

impl ForecastError {
    /// Builds a schema error naming whichever canonical roles could not be
    /// resolved.
    pub fn missing_roles(missing_date: bool, missing_measure: bool, columns: &[String]) -> Self {
        let mut missing = Vec::new();
        if missing_date {
            missing.push("date column (e.g. date, day, timestamp, year)");
        }
        if missing_measure {
            missing.push("sales column (e.g. sales, quantity, amount, revenue)");
        }
        let found = columns
            .iter()
            .take(LISTED_COLUMNS)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        ForecastError::Schema {
            missing: missing.join(" and "),
            found,
        }
    }

    /// Stable machine-readable label, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ForecastError::InvalidInput(_) => "invalid_input",
            ForecastError::Schema { .. } => "schema_error",
            ForecastError::DateParse => "date_parse_error",
            ForecastError::InsufficientData { .. } => "insufficient_data",
            ForecastError::NoGroups => "no_groups",
            ForecastError::ModelFit(_) => "model_fit_error",
            ForecastError::Timeout(_) => "timeout",
        }
    }
}
