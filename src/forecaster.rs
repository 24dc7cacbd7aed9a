//! The forecasting collaborator.
//!
//! The pipeline only talks to the [`Forecaster`] trait: given an ordered
//! series and a [`ForecastSpec`] it returns one [`ForecastPoint`] per future
//! month. [`TrendForecaster`] is the engine shipped with the service; tests and
//! embedders can swap in anything else.

use anyhow::{Result, bail, ensure};
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Number of future months every forecast covers.
pub const FORECAST_HORIZON: usize = 12;
/// Coverage of the prediction interval around each point forecast.
pub const INTERVAL_WIDTH: f64 = 0.8;
/// Yearly seasonality is only modelled for series longer than this.
pub const YEARLY_SEASONALITY_MIN_OBSERVATIONS: usize = 365;

const SECONDS_PER_DAY: f64 = 86_400.0;
const EPSILON: f64 = 1e-10;

/// An ordered series of observations, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub timestamps: Vec<NaiveDateTime>,
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamps.last().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    /// Calendar months, each anchored on its last day.
    MonthEnd,
}

impl Frequency {
    /// The `horizon` periods strictly after the period containing `last`.
    pub fn future_periods(self, last: NaiveDateTime, horizon: usize) -> Vec<NaiveDate> {
        match self {
            Frequency::MonthEnd => {
                let Some(month_start) = last.date().with_day(1) else {
                    return Vec::new();
                };
                (1..=horizon as u32)
                    .filter_map(|offset| {
                        month_start
                            .checked_add_months(Months::new(offset + 1))
                            .and_then(|next| next.pred_opt())
                    })
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seasonality {
    pub daily: bool,
    pub weekly: bool,
    pub yearly: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastSpec {
    pub horizon: usize,
    pub frequency: Frequency,
    pub seasonality: Seasonality,
    pub interval_width: f64,
}

impl ForecastSpec {
    pub fn for_series(series: &TimeSeries) -> Self {
        Self {
            horizon: FORECAST_HORIZON,
            frequency: Frequency::MonthEnd,
            seasonality: Seasonality {
                daily: false,
                weekly: false,
                yearly: series.len() > YEARLY_SEASONALITY_MIN_OBSERVATIONS,
            },
            interval_width: INTERVAL_WIDTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    /// Last day of the forecast month.
    pub period: NaiveDate,
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl ForecastPoint {
    pub fn label(&self) -> String {
        self.period.format("%Y-%m").to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForecastWindow {
    pub points: Vec<ForecastPoint>,
}

impl ForecastWindow {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

pub trait Forecaster: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fits the model to `series` and predicts `spec.horizon` future periods.
    /// May take a long time for large inputs; callers run it off the async
    /// executor.
    fn fit_predict(&self, series: &TimeSeries, spec: &ForecastSpec) -> Result<ForecastWindow>;
}

/// Linear trend fitted by ordinary least squares over elapsed days, with
/// optional month-of-year offsets and Student-t prediction intervals.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendForecaster;

struct TrendFit {
    origin: NaiveDateTime,
    intercept: f64,
    slope: f64,
    x_mean: f64,
    sxx: f64,
    month_offsets: Option<[f64; 12]>,
    residual_se: f64,
    n: usize,
}

fn elapsed_days(origin: NaiveDateTime, at: NaiveDateTime) -> f64 {
    (at - origin).num_seconds() as f64 / SECONDS_PER_DAY
}

fn month_index(at: NaiveDateTime) -> usize {
    at.month0() as usize
}

impl TrendFit {
    fn fit(series: &TimeSeries, yearly: bool) -> Result<Self> {
        let n = series.len();
        ensure!(
            n >= 3,
            "need at least 3 observations to fit a trend, got {n}"
        );
        let origin = series.timestamps[0];
        let x = series
            .timestamps
            .iter()
            .map(|ts| elapsed_days(origin, *ts))
            .collect::<Vec<_>>();
        let y = &series.values;

        let x_mean = x.iter().sum::<f64>() / n as f64;
        let y_mean = y.iter().sum::<f64>() / n as f64;
        let sxx = x.iter().map(|xi| (xi - x_mean).powi(2)).sum::<f64>();
        let sxy = x
            .iter()
            .zip(y)
            .map(|(xi, yi)| (xi - x_mean) * (yi - y_mean))
            .sum::<f64>();
        let slope = if sxx > EPSILON { sxy / sxx } else { 0.0 };
        let intercept = y_mean - slope * x_mean;

        let mut residuals = x
            .iter()
            .zip(y)
            .map(|(xi, yi)| yi - (intercept + slope * xi))
            .collect::<Vec<_>>();

        let month_offsets = yearly.then(|| {
            let mut sums = [0.0; 12];
            let mut counts = [0usize; 12];
            for (ts, residual) in series.timestamps.iter().zip(&residuals) {
                sums[month_index(*ts)] += residual;
                counts[month_index(*ts)] += 1;
            }
            let mut offsets = [0.0; 12];
            for month in 0..12 {
                if counts[month] > 0 {
                    offsets[month] = sums[month] / counts[month] as f64;
                }
            }
            offsets
        });
        if let Some(offsets) = &month_offsets {
            for (ts, residual) in series.timestamps.iter().zip(residuals.iter_mut()) {
                *residual -= offsets[month_index(*ts)];
            }
        }

        let ssr = residuals.iter().map(|r| r * r).sum::<f64>();
        let residual_se = (ssr / (n - 2) as f64).sqrt();

        Ok(Self {
            origin,
            intercept,
            slope,
            x_mean,
            sxx,
            month_offsets,
            residual_se,
            n,
        })
    }

    fn predict(&self, at: NaiveDateTime) -> (f64, f64) {
        let x = elapsed_days(self.origin, at);
        let seasonal = self
            .month_offsets
            .map(|offsets| offsets[month_index(at)])
            .unwrap_or(0.0);
        let leverage = if self.sxx > EPSILON {
            (x - self.x_mean).powi(2) / self.sxx
        } else {
            0.0
        };
        let point = self.intercept + self.slope * x + seasonal;
        let spread = self.residual_se * (1.0 + 1.0 / self.n as f64 + leverage).sqrt();
        (point, spread)
    }
}

impl Forecaster for TrendForecaster {
    fn name(&self) -> &'static str {
        "linear-trend"
    }

    fn fit_predict(&self, series: &TimeSeries, spec: &ForecastSpec) -> Result<ForecastWindow> {
        ensure!(
            spec.interval_width > 0.0 && spec.interval_width < 1.0,
            "interval width must be within (0, 1), got {}",
            spec.interval_width
        );
        let fit = TrendFit::fit(series, spec.seasonality.yearly)?;
        let Some(last) = series.last_timestamp() else {
            bail!("series has no timestamps");
        };

        let quantile = if fit.residual_se < EPSILON {
            0.0
        } else {
            let dist = StudentsT::new(0.0, 1.0, (fit.n - 2) as f64)
                .map_err(|err| anyhow::anyhow!("Failed to create t-distribution: {err}"))?;
            dist.inverse_cdf((1.0 + spec.interval_width) / 2.0)
        };

        let periods = spec.frequency.future_periods(last, spec.horizon);
        ensure!(
            periods.len() == spec.horizon,
            "could not generate {} future periods after {last}",
            spec.horizon
        );

        let mut points = Vec::with_capacity(periods.len());
        for period in periods {
            let Some(at) = period.and_hms_opt(0, 0, 0) else {
                bail!("invalid period {period}");
            };
            let (point, spread) = fit.predict(at);
            let half_width = quantile * spread;
            if !point.is_finite() || !half_width.is_finite() {
                bail!("prediction for {period} produced non-finite values");
            }
            points.push(ForecastPoint {
                period,
                point_estimate: point,
                lower_bound: point - half_width,
                upper_bound: point + half_width,
            });
        }
        Ok(ForecastWindow { points })
    }
}
