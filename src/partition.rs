//! Splits a normalized table into the series handed to the forecaster.

use std::collections::HashMap;

use log::{debug, info};

use crate::{
    error::ForecastError,
    forecaster::TimeSeries,
    normalize::{NormalizedSeries, Observation},
};

/// Minimum number of valid observations a series needs to be forecast.
pub const MIN_OBSERVATIONS: usize = 3;

/// One unit of forecasting work. Invalid series are kept, carrying the reason
/// they cannot be forecast, so they still appear in the response.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesBatch {
    pub key: Option<String>,
    pub series: Result<TimeSeries, ForecastError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Partition {
    Single(SeriesBatch),
    Grouped(Vec<SeriesBatch>),
}

impl Partition {
    pub fn batches(&self) -> &[SeriesBatch] {
        match self {
            Partition::Single(batch) => std::slice::from_ref(batch),
            Partition::Grouped(batches) => batches,
        }
    }
}

/// Drops rows without a value, orders by timestamp and enforces
/// [`MIN_OBSERVATIONS`].
pub fn validate_series<'a>(
    rows: impl IntoIterator<Item = &'a Observation>,
) -> Result<TimeSeries, ForecastError> {
    let mut points = rows
        .into_iter()
        .filter_map(|row| row.value.map(|value| (row.timestamp, value)))
        .collect::<Vec<_>>();
    if points.len() < MIN_OBSERVATIONS {
        return Err(ForecastError::InsufficientData {
            required: MIN_OBSERVATIONS,
            found: points.len(),
        });
    }
    points.sort_by_key(|(timestamp, _)| *timestamp);
    let (timestamps, values) = points.into_iter().unzip();
    Ok(TimeSeries { timestamps, values })
}

pub fn partition(series: &NormalizedSeries) -> Result<Partition, ForecastError> {
    series.require_roles()?;

    if !series.is_grouped() {
        return Ok(Partition::Single(SeriesBatch {
            key: None,
            series: validate_series(&series.rows),
        }));
    }

    let mut order: Vec<&str> = Vec::new();
    let mut members: HashMap<&str, Vec<&Observation>> = HashMap::new();
    for row in &series.rows {
        let Some(key) = row.group_key.as_deref() else {
            continue;
        };
        members
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(row);
    }
    if order.is_empty() {
        return Err(ForecastError::NoGroups);
    }

    let batches = order
        .into_iter()
        .map(|key| {
            let rows = members.remove(key).unwrap_or_default();
            let series = validate_series(rows);
            if let Err(err) = &series {
                debug!("Group '{key}' cannot be forecast: {err}");
            }
            SeriesBatch {
                key: Some(key.to_string()),
                series,
            }
        })
        .collect::<Vec<_>>();
    info!(
        "Partitioned into {} group(s), {} forecastable",
        batches.len(),
        batches.iter().filter(|b| b.series.is_ok()).count()
    );
    Ok(Partition::Grouped(batches))
}
