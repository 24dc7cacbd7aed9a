//! Row and group caps that bound the work done for a single request.
//!
//! Row sampling draws from a fixed-seed generator, so the same upload with the
//! same cap always keeps the same rows. Kept rows stay in their original
//! relative order.

use std::collections::HashSet;

use itertools::Itertools;
use log::info;
use rand::{SeedableRng, rngs::StdRng, seq::index};
use serde::Serialize;

use crate::{
    config::PipelineConfig,
    normalize::{NormalizedSeries, Observation},
};

/// Caps requested by the caller. `None` selects the automatic default and
/// `Some(0)` disables the cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimitRequest {
    pub max_rows: Option<usize>,
    pub max_groups: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub auto_row_cap: usize,
    pub default_group_cap: usize,
    pub seed: u64,
}

impl From<&PipelineConfig> for LimitPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            auto_row_cap: config.auto_row_cap,
            default_group_cap: config.default_group_cap,
            seed: config.sample_seed,
        }
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl LimitPolicy {
    fn row_cap(&self, requested: Option<usize>, rows: usize) -> Option<usize> {
        match requested {
            Some(0) => None,
            Some(cap) => Some(cap),
            None => (rows > self.auto_row_cap).then_some(self.auto_row_cap),
        }
    }

    fn group_cap(&self, requested: Option<usize>) -> Option<usize> {
        match requested {
            Some(0) => None,
            Some(cap) => Some(cap),
            None => Some(self.default_group_cap),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LimitReport {
    pub rows_before: usize,
    pub rows_after: usize,
    pub groups_discovered: Option<usize>,
    pub groups_retained: Option<usize>,
}

impl LimitReport {
    pub fn rows_sampled(&self) -> bool {
        self.rows_after < self.rows_before
    }

    pub fn groups_truncated(&self) -> bool {
        matches!(
            (self.groups_discovered, self.groups_retained),
            (Some(found), Some(kept)) if kept < found
        )
    }

    /// Human-readable summary of every cap that actually removed data.
    pub fn note(&self) -> Option<String> {
        let mut parts = Vec::new();
        if self.rows_sampled() {
            parts.push(format!(
                "Dataset sampled to {} of {} rows.",
                self.rows_after, self.rows_before
            ));
        }
        if self.groups_truncated()
            && let (Some(found), Some(kept)) = (self.groups_discovered, self.groups_retained)
        {
            parts.push(format!(
                "Forecasting the first {kept} of {found} products; pass max_products to change this."
            ));
        }
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

/// Keeps exactly `cap` rows chosen by a generator seeded with `seed`.
pub fn sample_rows(rows: Vec<Observation>, cap: usize, seed: u64) -> Vec<Observation> {
    if rows.len() <= cap {
        return rows;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let chosen = index::sample(&mut rng, rows.len(), cap)
        .into_iter()
        .collect::<HashSet<_>>();
    rows.into_iter()
        .enumerate()
        .filter(|(idx, _)| chosen.contains(idx))
        .map(|(_, row)| row)
        .collect()
}

/// Distinct group keys in order of first appearance.
pub fn groups_in_order(rows: &[Observation]) -> Vec<&str> {
    rows.iter()
        .filter_map(|row| row.group_key.as_deref())
        .unique()
        .collect()
}

pub fn apply_limits(
    mut series: NormalizedSeries,
    request: LimitRequest,
    policy: &LimitPolicy,
) -> (NormalizedSeries, LimitReport) {
    let rows_before = series.rows.len();
    if let Some(cap) = policy.row_cap(request.max_rows, rows_before)
        && rows_before > cap
    {
        series.rows = sample_rows(std::mem::take(&mut series.rows), cap, policy.seed);
        info!("Sampled {cap} of {rows_before} row(s) (seed {})", policy.seed);
    }

    let mut report = LimitReport {
        rows_before,
        ..LimitReport::default()
    };

    if series.is_grouped() {
        let groups = groups_in_order(&series.rows)
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let kept = match policy.group_cap(request.max_groups) {
            Some(cap) if groups.len() > cap => {
                let retained = groups[..cap].iter().cloned().collect::<HashSet<_>>();
                series.rows.retain(|row| {
                    row.group_key
                        .as_ref()
                        .is_none_or(|key| retained.contains(key))
                });
                info!("Keeping the first {cap} of {} group(s)", groups.len());
                cap
            }
            _ => groups.len(),
        };
        report.groups_discovered = Some(groups.len());
        report.groups_retained = Some(kept);
    }

    report.rows_after = series.rows.len();
    (series, report)
}
