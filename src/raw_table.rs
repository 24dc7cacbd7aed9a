//! In-memory representation of an uploaded CSV.
//!
//! A [`RawTable`] is parsed once per request and never mutated afterwards.
//! Columns keep their original order and header text; every cell is a typed
//! [`Cell`] and every column carries the [`ColumnKind`] inferred from all of
//! its present cells.

use std::collections::{HashMap, HashSet};

use encoding_rs::Encoding;
use log::debug;
use serde::Serialize;

use crate::{
    data::{Cell, parse_cell},
    error::ForecastError,
    io_utils,
};

/// Number of leading present values kept per column for fallback heuristics.
pub const SAMPLE_VALUES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
    Empty,
}

impl ColumnKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Float)
    }
}

#[derive(Debug, Clone)]
struct KindCandidate {
    seen: bool,
    possible_integer: bool,
    possible_float: bool,
}

impl KindCandidate {
    fn new() -> Self {
        Self {
            seen: false,
            possible_integer: true,
            possible_float: true,
        }
    }

    fn update(&mut self, cell: &Cell) {
        match cell {
            Cell::Missing => return,
            Cell::Integer(_) => {}
            Cell::Float(_) => self.possible_integer = false,
            Cell::Text(_) => {
                self.possible_integer = false;
                self.possible_float = false;
            }
        }
        self.seen = true;
    }

    fn decide(&self) -> ColumnKind {
        if !self.seen {
            ColumnKind::Empty
        } else if self.possible_integer {
            ColumnKind::Integer
        } else if self.possible_float {
            ColumnKind::Float
        } else {
            ColumnKind::Text
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawColumn {
    pub name: String,
    pub kind: ColumnKind,
    pub cells: Vec<Cell>,
}

impl RawColumn {
    /// First few present cells, in row order.
    pub fn sample(&self) -> impl Iterator<Item = &Cell> {
        self.cells
            .iter()
            .filter(|cell| !cell.is_missing())
            .take(SAMPLE_VALUES)
    }

    pub fn first_present(&self) -> Option<&Cell> {
        self.cells.iter().find(|cell| !cell.is_missing())
    }
}

#[derive(Debug, Clone)]
pub struct RawTable {
    columns: Vec<RawColumn>,
    row_count: usize,
}

impl RawTable {
    /// Decodes and parses an uploaded byte stream. A header row is required.
    pub fn from_bytes(
        bytes: &[u8],
        delimiter: u8,
        encoding: &'static Encoding,
    ) -> Result<Self, ForecastError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ForecastError::InvalidInput("the upload is empty".to_string()));
        }
        let text = io_utils::decode_bytes(bytes, encoding)
            .map_err(|err| ForecastError::InvalidInput(err.to_string()))?;
        Self::from_text(&text, delimiter)
    }

    pub fn from_text(text: &str, delimiter: u8) -> Result<Self, ForecastError> {
        let mut reader = io_utils::open_csv_reader(text.as_bytes(), delimiter);
        let headers = reader
            .headers()
            .map_err(|err| ForecastError::InvalidInput(err.to_string()))?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
            return Err(ForecastError::InvalidInput(
                "a header row is required".to_string(),
            ));
        }
        let names = disambiguate_headers(&headers);
        let width = names.len();

        let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); width];
        let mut candidates = vec![KindCandidate::new(); width];
        let mut row_count = 0usize;
        for (row_idx, record) in reader.records().enumerate() {
            let record = record.map_err(|err| {
                ForecastError::InvalidInput(format!("row {}: {err}", row_idx + 2))
            })?;
            if record.len() > width {
                return Err(ForecastError::InvalidInput(format!(
                    "row {} has {} fields, expected {width}",
                    row_idx + 2,
                    record.len()
                )));
            }
            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            for idx in 0..width {
                let cell = record.get(idx).map(parse_cell).unwrap_or(Cell::Missing);
                candidates[idx].update(&cell);
                cells[idx].push(cell);
            }
            row_count += 1;
        }

        let columns = names
            .into_iter()
            .zip(cells)
            .zip(candidates)
            .map(|((name, cells), candidate)| RawColumn {
                name,
                kind: candidate.decide(),
                cells,
            })
            .collect::<Vec<_>>();
        debug!(
            "Parsed {row_count} row(s) across {} column(s)",
            columns.len()
        );
        Ok(Self { columns, row_count })
    }

    pub fn columns(&self) -> &[RawColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&RawColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }
}

/// Repeated header names become `name`, `name.1`, `name.2`, ...
fn disambiguate_headers(headers: &[String]) -> Vec<String> {
    let reserved: HashSet<&str> = headers.iter().map(|header| header.trim()).collect();
    let mut taken: HashSet<String> = HashSet::new();
    let mut suffixes: HashMap<String, usize> = HashMap::new();
    headers
        .iter()
        .map(|header| {
            let header = header.trim();
            if taken.insert(header.to_string()) {
                return header.to_string();
            }
            // Renamed duplicates must not shadow a header that appears verbatim.
            let suffix = suffixes.entry(header.to_string()).or_insert(0);
            loop {
                *suffix += 1;
                let candidate = format!("{header}.{suffix}");
                if !reserved.contains(candidate.as_str()) && taken.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}
