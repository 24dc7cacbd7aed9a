use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{config::PipelineConfig, io_utils};

#[derive(Debug, Parser)]
#[command(author, version, about = "Forecast monthly sales from CSV uploads", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP forecasting service
    Serve(ServeArgs),
    /// Forecast a local CSV file and print the response JSON
    Forecast(ForecastArgs),
    /// Show how each column of a CSV file would be classified
    Inspect(InspectArgs),
}

/// Options shared by every command that reads a configuration file.
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// YAML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Options controlling how an input file is decoded.
#[derive(Debug, Args)]
pub struct InputArgs {
    /// Input CSV file (`-` reads standard input)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

impl InputArgs {
    /// Writes explicit flags over the loaded configuration.
    pub fn apply_to(&self, config: &mut PipelineConfig) {
        config.delimiter = io_utils::resolve_input_delimiter(
            &self.input,
            self.delimiter,
            config.delimiter_byte(),
        ) as char;
        if let Some(encoding) = &self.input_encoding {
            config.input_encoding = Some(encoding.clone());
        }
    }
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Address to listen on, e.g. 0.0.0.0:8000
    #[arg(long)]
    pub bind: Option<String>,
    /// Maximum number of groups forecast concurrently per request
    #[arg(long)]
    pub workers: Option<usize>,
    /// Time budget for a single group's forecast, in seconds
    #[arg(long = "group-timeout-secs")]
    pub group_timeout_secs: Option<u64>,
}

impl ServeArgs {
    pub fn apply_to(&self, config: &mut PipelineConfig) {
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(secs) = self.group_timeout_secs {
            config.group_timeout_secs = secs;
        }
    }
}

#[derive(Debug, Args)]
pub struct ForecastArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Sample the input down to this many rows (0 disables sampling)
    #[arg(long = "max-rows")]
    pub max_rows: Option<usize>,
    /// Forecast at most this many products (0 forecasts all of them)
    #[arg(long = "max-products")]
    pub max_products: Option<usize>,
    /// Pretty-print the JSON response
    #[arg(long)]
    pub pretty: bool,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub config: ConfigArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
