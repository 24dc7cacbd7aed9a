use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const MIN_YEAR: i64 = 1900;
pub const MAX_YEAR: i64 = 2100;

/// Whole floats below this magnitude print as integers without losing digits.
const EXACT_INTEGER_LIMIT: f64 = 9.0e15;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Cell {
    Missing,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Integer(i) => Some(*i as f64),
            Cell::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    pub fn as_display(&self) -> Option<String> {
        match self {
            Cell::Missing => None,
            Cell::Integer(i) => Some(i.to_string()),
            Cell::Float(f) => {
                if f.fract() == 0.0 && f.abs() < EXACT_INTEGER_LIMIT {
                    Some((*f as i64).to_string())
                } else {
                    Some(f.to_string())
                }
            }
            Cell::Text(s) => Some(s.clone()),
        }
    }

    /// Returns the year when the cell holds a bare four-digit year within
    /// [`MIN_YEAR`, `MAX_YEAR`].
    pub fn as_year(&self) -> Option<i32> {
        let year = match self {
            Cell::Integer(i) => *i,
            Cell::Float(f) if f.fract() == 0.0 && f.abs() < EXACT_INTEGER_LIMIT => *f as i64,
            Cell::Text(s) => return parse_year_token(s),
            _ => return None,
        };
        (MIN_YEAR..=MAX_YEAR).contains(&year).then_some(year as i32)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display().unwrap_or_default())
    }
}

/// Parses one raw CSV field into a [`Cell`], treating the usual placeholder
/// tokens as missing.
pub fn parse_cell(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_placeholder_token(trimmed) {
        return Cell::Missing;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Cell::Integer(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Cell::Float(f);
    }
    Cell::Text(trimmed.to_string())
}

fn is_placeholder_token(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "na" | "n/a" | "#n/a" | "nan" | "-nan" | "null" | "none" | "<na>" | "#na"
    )
}

/// Accepts exactly four ASCII digits within the supported year range.
pub fn parse_year_token(value: &str) -> Option<i32> {
    let trimmed = value.trim();
    if trimmed.len() != 4 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i64 = trimmed.parse().ok()?;
    (MIN_YEAR..=MAX_YEAR).contains(&year).then_some(year as i32)
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d", "%Y/%m/%d", "%Y%m%d", "%m/%d/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d %b %Y",
        "%d %B %Y", "%b %d, %Y", "%B %d, %Y",
    ];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Some(parsed);
        }
    }
    None
}

/// Year-month tokens such as `2020-01`, `2020/01`, `Jan 2020` resolve to the
/// first of the month.
pub fn parse_year_month(value: &str) -> Option<NaiveDate> {
    const MONTH_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d %b %Y", "%d %B %Y"];
    let candidates = [
        format!("{value}-01"),
        format!("{value}/01"),
        format!("01 {value}"),
    ];
    for candidate in &candidates {
        for fmt in MONTH_FORMATS {
            if let Ok(parsed) = NaiveDate::parse_from_str(candidate, fmt) {
                return Some(parsed);
            }
        }
    }
    None
}

pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(parsed);
        }
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.naive_utc())
}

/// Best-effort temporal parse of a single cell. Returns `None` when no known
/// format matches.
pub fn parse_timestamp(cell: &Cell) -> Option<NaiveDateTime> {
    let text = match cell {
        Cell::Missing => return None,
        Cell::Text(s) => s.clone(),
        Cell::Integer(i) => i.to_string(),
        Cell::Float(_) => cell.as_display()?,
    };
    let text = text.trim();
    let parsed = parse_naive_date(text)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .or_else(|| parse_naive_datetime(text))
        .or_else(|| parse_year_month(text).and_then(|date| date.and_hms_opt(0, 0, 0)))?;
    // chrono accepts one to four year digits; short years are never calendar dates here
    (parsed.year() >= 1000).then_some(parsed)
}
