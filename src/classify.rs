//! Column role classification.
//!
//! Each column name is run through an ordered rule table. The first rule whose
//! predicate matches decides the column: it receives the rule's role when that
//! role is still free, and stays [`ColumnRole::Unassigned`] otherwise. Two
//! fallback passes then fill a missing date role from four-digit year names
//! and a missing measure role from the first all-numeric column.
//!
//! Keyword matching is substring based, so `"weekday_count"` is a date column
//! because it contains `"day"` before the measure rule gets a chance.

use log::debug;
use serde::Serialize;

use crate::{
    data::parse_year_token,
    raw_table::{ColumnKind, RawColumn, RawTable},
};

pub const DATE_KEYWORDS: &[&str] = &[
    "date",
    "day",
    "timestamp",
    "order_date",
    "period",
    "sale_date",
    "time",
    "datetime",
    "year",
    "month",
    "week",
    "transaction_date",
    "purchase_date",
    "invoice_date",
    "delivery_date",
];

pub const MEASURE_KEYWORDS: &[&str] = &[
    "sales",
    "quantity",
    "qty",
    "amount",
    "revenue",
    "value",
    "units_sold",
    "sales_amount",
    "total",
    "price",
    "cost",
    "sum",
    "volume",
    "count",
    "num",
    "number",
    "units",
    "qty_sold",
];

pub const GROUP_KEYWORDS: &[&str] = &[
    "item",
    "product",
    "product_id",
    "product_name",
    "sku",
    "item_id",
    "item_name",
    "description",
    "product_desc",
    "item_code",
    "product_code",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    Date,
    Measure,
    Group,
    Unassigned,
}

/// The parts of a column the classifier is allowed to look at.
#[derive(Debug, Clone)]
pub struct ColumnProfile<'a> {
    pub name: &'a str,
    pub kind: ColumnKind,
    pub sampled_values: usize,
}

impl<'a> From<&'a RawColumn> for ColumnProfile<'a> {
    fn from(column: &'a RawColumn) -> Self {
        Self {
            name: &column.name,
            kind: column.kind,
            sampled_values: column.sample().count(),
        }
    }
}

struct NameRule {
    label: &'static str,
    role: ColumnRole,
    matches: fn(&str) -> bool,
}

const NAME_RULES: &[NameRule] = &[
    NameRule {
        label: "temporal keyword",
        role: ColumnRole::Date,
        matches: has_date_keyword,
    },
    NameRule {
        label: "year-only name",
        role: ColumnRole::Date,
        matches: is_year_name,
    },
    NameRule {
        label: "measure keyword",
        role: ColumnRole::Measure,
        matches: has_measure_keyword,
    },
    NameRule {
        label: "grouping keyword",
        role: ColumnRole::Group,
        matches: has_group_keyword,
    },
];

fn normalized(name: &str) -> String {
    name.trim().to_lowercase()
}

fn contains_any(name: &str, keywords: &[&str]) -> bool {
    let lowered = normalized(name);
    keywords.iter().any(|keyword| lowered.contains(keyword))
}

fn has_date_keyword(name: &str) -> bool {
    contains_any(name, DATE_KEYWORDS)
}

fn has_measure_keyword(name: &str) -> bool {
    contains_any(name, MEASURE_KEYWORDS)
}

fn has_group_keyword(name: &str) -> bool {
    contains_any(name, GROUP_KEYWORDS)
}

fn is_year_name(name: &str) -> bool {
    parse_year_token(name).is_some()
}

/// Tracks which single-holder roles are already taken while rules run.
#[derive(Debug)]
struct RoleAccumulator {
    roles: Vec<ColumnRole>,
}

impl RoleAccumulator {
    fn new(columns: usize) -> Self {
        Self {
            roles: vec![ColumnRole::Unassigned; columns],
        }
    }

    fn holder(&self, role: ColumnRole) -> Option<usize> {
        self.roles.iter().position(|r| *r == role)
    }

    fn is_taken(&self, role: ColumnRole) -> bool {
        self.holder(role).is_some()
    }

    /// Gives `role` to column `idx` unless another column already holds it.
    fn claim(&mut self, idx: usize, role: ColumnRole) -> bool {
        if role == ColumnRole::Unassigned || self.is_taken(role) {
            return false;
        }
        self.roles[idx] = role;
        true
    }

    fn finish(self, profiles: &[ColumnProfile<'_>]) -> ColumnMapping {
        ColumnMapping {
            assignments: profiles
                .iter()
                .zip(self.roles)
                .map(|(profile, role)| (profile.name.to_string(), role))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    assignments: Vec<(String, ColumnRole)>,
}

impl ColumnMapping {
    pub fn assignments(&self) -> &[(String, ColumnRole)] {
        &self.assignments
    }

    /// Name of the first column holding `role`.
    pub fn column_for(&self, role: ColumnRole) -> Option<&str> {
        self.assignments
            .iter()
            .find(|(_, r)| *r == role)
            .map(|(name, _)| name.as_str())
    }

    pub fn role_of(&self, name: &str) -> ColumnRole {
        self.assignments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, role)| *role)
            .unwrap_or(ColumnRole::Unassigned)
    }

    pub fn has(&self, role: ColumnRole) -> bool {
        self.column_for(role).is_some()
    }
}

pub fn classify_table(table: &RawTable) -> ColumnMapping {
    let profiles = table
        .columns()
        .iter()
        .map(ColumnProfile::from)
        .collect::<Vec<_>>();
    classify(&profiles)
}

pub fn classify(profiles: &[ColumnProfile<'_>]) -> ColumnMapping {
    let mut acc = RoleAccumulator::new(profiles.len());

    for (idx, profile) in profiles.iter().enumerate() {
        let Some(rule) = NAME_RULES.iter().find(|rule| (rule.matches)(profile.name)) else {
            continue;
        };
        if acc.claim(idx, rule.role) {
            debug!(
                "Column '{}' -> {:?} ({})",
                profile.name, rule.role, rule.label
            );
        } else {
            debug!(
                "Column '{}' matched {} but {:?} is already assigned",
                profile.name, rule.label, rule.role
            );
        }
    }

    if !acc.is_taken(ColumnRole::Date)
        && let Some(idx) = profiles.iter().position(|p| is_year_name(p.name))
        && acc.claim(idx, ColumnRole::Date)
    {
        debug!(
            "Column '{}' -> Date (year-name fallback)",
            profiles[idx].name
        );
    }

    if !acc.is_taken(ColumnRole::Measure) {
        let candidate = profiles.iter().enumerate().position(|(idx, p)| {
            acc.roles[idx] == ColumnRole::Unassigned && p.kind.is_numeric() && p.sampled_values > 0
        });
        if let Some(idx) = candidate
            && acc.claim(idx, ColumnRole::Measure)
        {
            debug!(
                "Column '{}' -> Measure (numeric fallback)",
                profiles[idx].name
            );
        }
    }

    acc.finish(profiles)
}
