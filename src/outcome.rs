//! Response shapes shared by the HTTP handler and the `forecast` command.

use serde::Serialize;

use crate::{
    error::ForecastError,
    forecaster::{ForecastPoint, ForecastWindow},
    limit::LimitReport,
    orchestrator::GroupResult,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRecord {
    /// Forecast month as `YYYY-MM`.
    pub date: String,
    pub forecast: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

impl From<&ForecastPoint> for ForecastRecord {
    fn from(point: &ForecastPoint) -> Self {
        Self {
            date: point.label(),
            forecast: point.point_estimate,
            yhat_lower: point.lower_bound,
            yhat_upper: point.upper_bound,
        }
    }
}

fn records(window: &ForecastWindow) -> Vec<ForecastRecord> {
    window.points.iter().map(ForecastRecord::from).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProductForecast {
    Forecast {
        product: String,
        forecast: Vec<ForecastRecord>,
    },
    Error {
        product: String,
        error: String,
    },
}

impl From<&GroupResult> for ProductForecast {
    fn from(result: &GroupResult) -> Self {
        let product = result.group.clone().unwrap_or_default();
        match &result.outcome {
            Ok(window) => ProductForecast::Forecast {
                product,
                forecast: records(window),
            },
            Err(err) => ProductForecast::Error {
                product,
                error: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub total_rows_processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_products: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub products_processed: Option<usize>,
    pub note: Option<String>,
}

impl From<&LimitReport> for RunMetadata {
    fn from(report: &LimitReport) -> Self {
        Self {
            total_rows_processed: report.rows_after,
            total_products: report.groups_discovered,
            products_processed: report.groups_retained,
            note: report.note(),
        }
    }
}

/// Everything one request produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Single {
        window: ForecastWindow,
        /// Only present when rows were sampled away.
        metadata: Option<RunMetadata>,
    },
    Grouped {
        results: Vec<GroupResult>,
        metadata: RunMetadata,
    },
    Failed(ForecastError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ForecastResponse {
    Single {
        forecast: Vec<ForecastRecord>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<RunMetadata>,
    },
    Grouped {
        forecasts: Vec<ProductForecast>,
        metadata: RunMetadata,
    },
    Error {
        error: String,
    },
}

impl RequestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RequestOutcome::Failed(_))
    }

    pub fn to_response(&self) -> ForecastResponse {
        match self {
            RequestOutcome::Single { window, metadata } => ForecastResponse::Single {
                forecast: records(window),
                metadata: metadata.clone(),
            },
            RequestOutcome::Grouped { results, metadata } => ForecastResponse::Grouped {
                forecasts: results.iter().map(ProductForecast::from).collect(),
                metadata: metadata.clone(),
            },
            RequestOutcome::Failed(err) => ForecastResponse::Error {
                error: err.to_string(),
            },
        }
    }
}

impl From<ForecastError> for RequestOutcome {
    fn from(err: ForecastError) -> Self {
        RequestOutcome::Failed(err)
    }
}
