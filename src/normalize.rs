//! Canonical `{timestamp, value, group_key}` rows built from a classified
//! [`RawTable`].
//!
//! The normalizer only fails when the date column exists but none of its cells
//! parse. Missing roles are carried forward and reported by the partitioner,
//! which is the first stage that actually needs them.

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info};

use crate::{
    classify::{ColumnMapping, ColumnRole},
    data::{Cell, parse_timestamp},
    error::ForecastError,
    raw_table::{RawColumn, RawTable},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
    pub group_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedSeries {
    pub rows: Vec<Observation>,
    /// Header names of the uploaded table, in order.
    pub source_columns: Vec<String>,
    pub date_column: Option<String>,
    pub measure_column: Option<String>,
    pub group_column: Option<String>,
    pub year_only: bool,
    /// Rows discarded because their timestamp did not parse.
    pub dropped_rows: usize,
}

impl NormalizedSeries {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_grouped(&self) -> bool {
        self.group_column.is_some()
    }

    /// Fails with a schema error naming every unresolved canonical role.
    pub fn require_roles(&self) -> Result<(), ForecastError> {
        let missing_date = self.date_column.is_none();
        let missing_measure = self.measure_column.is_none();
        if missing_date || missing_measure {
            return Err(ForecastError::missing_roles(
                missing_date,
                missing_measure,
                &self.source_columns,
            ));
        }
        Ok(())
    }
}

/// Year-only columns are detected from the first present value only.
fn holds_years(column: &RawColumn) -> bool {
    column
        .first_present()
        .and_then(Cell::as_year)
        .is_some()
}

fn year_start(cell: &Cell) -> Option<NaiveDateTime> {
    let year = cell.as_year()?;
    NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)
}

fn role_column<'t>(
    table: &'t RawTable,
    mapping: &ColumnMapping,
    role: ColumnRole,
) -> Option<&'t RawColumn> {
    mapping
        .column_for(role)
        .and_then(|name| table.column(name))
}

pub fn normalize(
    table: &RawTable,
    mapping: &ColumnMapping,
) -> Result<NormalizedSeries, ForecastError> {
    let date = role_column(table, mapping, ColumnRole::Date);
    let measure = role_column(table, mapping, ColumnRole::Measure);
    let group = role_column(table, mapping, ColumnRole::Group);

    let mut series = NormalizedSeries {
        source_columns: table.column_names(),
        date_column: date.map(|c| c.name.clone()),
        measure_column: measure.map(|c| c.name.clone()),
        group_column: group.map(|c| c.name.clone()),
        ..NormalizedSeries::default()
    };

    let Some(date) = date else {
        debug!("No date column resolved; skipping temporal normalization");
        return Ok(series);
    };

    series.year_only = holds_years(date);
    let timestamps = date
        .cells
        .iter()
        .map(|cell| {
            if series.year_only {
                year_start(cell)
            } else {
                parse_timestamp(cell)
            }
        })
        .collect::<Vec<_>>();

    if table.row_count() > 0 && timestamps.iter().all(Option::is_none) {
        return Err(ForecastError::DateParse);
    }

    for (idx, timestamp) in timestamps.into_iter().enumerate() {
        let Some(timestamp) = timestamp else {
            series.dropped_rows += 1;
            continue;
        };
        series.rows.push(Observation {
            timestamp,
            value: measure.and_then(|c| c.cells[idx].as_f64()),
            group_key: group.and_then(|c| c.cells[idx].as_display()),
        });
    }

    info!(
        "Normalized {} row(s) using date column '{}'{} ({} dropped for unparseable dates)",
        series.rows.len(),
        date.name,
        if series.year_only { " (year only)" } else { "" },
        series.dropped_rows
    );
    Ok(series)
}
