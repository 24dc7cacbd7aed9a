pub mod classify;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod forecaster;
pub mod io_utils;
pub mod limit;
pub mod normalize;
pub mod orchestrator;
pub mod outcome;
pub mod partition;
pub mod pipeline;
pub mod raw_table;
pub mod server;

use std::{env, io::Write, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};
use serde::Serialize;

use crate::{
    cli::{Cli, Commands},
    config::PipelineConfig,
    forecaster::TrendForecaster,
    limit::LimitRequest,
    outcome::RequestOutcome,
    pipeline::ForecastPipeline,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_forecast", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => handle_serve(&args),
        Commands::Forecast(args) => handle_forecast(&args),
        Commands::Inspect(args) => handle_inspect(&args),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<PipelineConfig> {
    let config = PipelineConfig::load_or_default(path)?;
    debug!("Effective configuration: {config:?}");
    Ok(config)
}

fn build_pipeline(config: PipelineConfig) -> Result<ForecastPipeline> {
    ForecastPipeline::new(config, Arc::new(TrendForecaster)).context("Configuring pipeline")
}

fn runtime(workers: usize) -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers.max(1))
        .enable_all()
        .build()
        .context("Starting async runtime")
}

fn handle_serve(args: &cli::ServeArgs) -> Result<()> {
    let mut config = load_config(args.config.config.as_deref())?;
    args.apply_to(&mut config);
    let workers = config.workers;
    let pipeline = build_pipeline(config)?;
    runtime(workers)?.block_on(server::serve(pipeline))
}

fn handle_forecast(args: &cli::ForecastArgs) -> Result<()> {
    let mut config = load_config(args.config.config.as_deref())?;
    args.input.apply_to(&mut config);
    info!(
        "Forecasting '{}' with delimiter '{}'",
        args.input.input.display(),
        printable_delimiter(config.delimiter_byte())
    );
    let bytes = io_utils::read_input(&args.input.input)?;
    let request = LimitRequest {
        max_rows: args.max_rows,
        max_groups: args.max_products,
    };
    let workers = config.workers;
    let pipeline = build_pipeline(config)?;
    let outcome = runtime(workers)?.block_on(pipeline.forecast_csv(bytes, request));
    print_json(&outcome.to_response(), args.pretty)?;
    if let RequestOutcome::Failed(err) = outcome {
        bail!("forecast failed: {err}");
    }
    Ok(())
}

fn handle_inspect(args: &cli::InspectArgs) -> Result<()> {
    let mut config = load_config(args.config.config.as_deref())?;
    args.input.apply_to(&mut config);
    let bytes = io_utils::read_input(&args.input.input)?;
    let pipeline = build_pipeline(config)?;
    let inspection = pipeline
        .inspect(&bytes)
        .with_context(|| format!("Inspecting {:?}", args.input.input))?;
    print_json(&inspection, true)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("Serializing response")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}").context("Writing response")?;
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
