//! End-to-end request processing: bytes in, [`RequestOutcome`] out.
//!
//! The synchronous preparation stages (parse, classify, normalize, limit,
//! partition) run on the blocking pool; forecasting is handed to the
//! [`Orchestrator`].

use std::sync::Arc;

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use log::info;
use serde::Serialize;
use tokio::task;

use crate::{
    classify::{ColumnMapping, ColumnRole, classify_table},
    config::PipelineConfig,
    error::ForecastError,
    forecaster::Forecaster,
    io_utils,
    limit::{LimitPolicy, LimitReport, LimitRequest, apply_limits},
    normalize::normalize,
    orchestrator::{GroupResult, Orchestrator},
    outcome::{RequestOutcome, RunMetadata},
    partition::{Partition, partition},
    raw_table::{ColumnKind, RawTable},
};

/// Output of the preparation stages, ready for forecasting.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub mapping: ColumnMapping,
    pub partition: Partition,
    pub report: LimitReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnReport {
    pub name: String,
    pub kind: ColumnKind,
    pub role: ColumnRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inspection {
    pub rows: usize,
    pub columns: Vec<ColumnReport>,
}

#[derive(Clone)]
pub struct ForecastPipeline {
    config: Arc<PipelineConfig>,
    encoding: &'static Encoding,
    orchestrator: Orchestrator,
}

impl ForecastPipeline {
    pub fn new(config: PipelineConfig, forecaster: Arc<dyn Forecaster>) -> Result<Self> {
        config.validate()?;
        let encoding = io_utils::resolve_encoding(config.input_encoding.as_deref())
            .context("Resolving input encoding")?;
        let orchestrator = Orchestrator::from_config(forecaster, &config);
        Ok(Self {
            config: Arc::new(config),
            encoding,
            orchestrator,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn read_table(&self, bytes: &[u8]) -> Result<RawTable, ForecastError> {
        let table = RawTable::from_bytes(bytes, self.config.delimiter_byte(), self.encoding)?;
        info!(
            "Parsed {} row(s) across {} column(s)",
            table.row_count(),
            table.columns().len()
        );
        Ok(table)
    }

    pub fn prepare(&self, bytes: &[u8], request: LimitRequest) -> Result<Prepared, ForecastError> {
        let table = self.read_table(bytes)?;
        let mapping = classify_table(&table);
        info!(
            "Resolved roles: date={:?} measure={:?} group={:?}",
            mapping.column_for(ColumnRole::Date),
            mapping.column_for(ColumnRole::Measure),
            mapping.column_for(ColumnRole::Group)
        );
        let normalized = normalize(&table, &mapping)?;
        let (limited, report) =
            apply_limits(normalized, request, &LimitPolicy::from(self.config.as_ref()));
        let partition = partition(&limited)?;
        Ok(Prepared {
            mapping,
            partition,
            report,
        })
    }

    pub fn inspect(&self, bytes: &[u8]) -> Result<Inspection, ForecastError> {
        let table = self.read_table(bytes)?;
        let mapping = classify_table(&table);
        let columns = table
            .columns()
            .iter()
            .map(|column| ColumnReport {
                name: column.name.clone(),
                kind: column.kind,
                role: mapping.role_of(&column.name),
            })
            .collect();
        Ok(Inspection {
            rows: table.row_count(),
            columns,
        })
    }

    pub async fn forecast_csv(&self, bytes: Vec<u8>, request: LimitRequest) -> RequestOutcome {
        let pipeline = self.clone();
        let prepared = match task::spawn_blocking(move || pipeline.prepare(&bytes, request)).await
        {
            Ok(Ok(prepared)) => prepared,
            Ok(Err(err)) => return RequestOutcome::Failed(err),
            Err(err) => {
                return RequestOutcome::Failed(ForecastError::InvalidInput(format!(
                    "preparation aborted: {err}"
                )));
            }
        };
        self.forecast_prepared(prepared).await
    }

    pub async fn forecast_prepared(&self, prepared: Prepared) -> RequestOutcome {
        let Prepared {
            partition, report, ..
        } = prepared;
        match partition {
            Partition::Single(batch) => {
                let result = self.orchestrator.run(vec![batch]).await.into_iter().next();
                match result {
                    Some(GroupResult {
                        outcome: Ok(window),
                        ..
                    }) => RequestOutcome::Single {
                        window,
                        metadata: report.rows_sampled().then(|| RunMetadata::from(&report)),
                    },
                    Some(GroupResult {
                        outcome: Err(err), ..
                    }) => RequestOutcome::Failed(err),
                    None => RequestOutcome::Failed(ForecastError::ModelFit(
                        "forecaster returned no result".to_string(),
                    )),
                }
            }
            Partition::Grouped(batches) => {
                let results = self.orchestrator.run(batches).await;
                RequestOutcome::Grouped {
                    results,
                    metadata: RunMetadata::from(&report),
                }
            }
        }
    }
}
