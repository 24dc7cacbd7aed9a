//! Service configuration, loaded from YAML.
//!
//! Every field is optional in the file; omitted fields take the defaults
//! below. Command-line flags are applied on top of the loaded values.

use std::{fs::File, io::BufReader, path::Path, thread, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::io_utils;

pub const DEFAULT_AUTO_ROW_CAP: usize = 10_000;
pub const DEFAULT_GROUP_CAP: usize = 5;
pub const DEFAULT_SAMPLE_SEED: u64 = 42;
pub const DEFAULT_GROUP_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Row cap applied when the caller does not provide one.
    pub auto_row_cap: usize,
    /// Group cap applied when the caller does not provide one.
    pub default_group_cap: usize,
    pub sample_seed: u64,
    pub group_timeout_secs: u64,
    /// Concurrent forecaster invocations per request.
    pub workers: usize,
    pub delimiter: char,
    pub input_encoding: Option<String>,
    pub bind: String,
    pub max_upload_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_row_cap: DEFAULT_AUTO_ROW_CAP,
            default_group_cap: DEFAULT_GROUP_CAP,
            sample_seed: DEFAULT_SAMPLE_SEED,
            group_timeout_secs: DEFAULT_GROUP_TIMEOUT_SECS,
            workers: default_workers(),
            delimiter: io_utils::DEFAULT_CSV_DELIMITER as char,
            input_encoding: None,
            bind: DEFAULT_BIND.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let config: PipelineConfig =
            serde_yaml::from_reader(reader).context("Parsing config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.workers > 0, "workers must be at least 1");
        ensure!(
            self.group_timeout_secs > 0,
            "group_timeout_secs must be at least 1"
        );
        ensure!(
            self.delimiter.is_ascii(),
            "delimiter must be an ASCII character"
        );
        ensure!(self.max_upload_bytes > 0, "max_upload_bytes must be positive");
        Ok(())
    }

    pub fn group_timeout(&self) -> Duration {
        Duration::from_secs(self.group_timeout_secs)
    }

    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "auto_row_cap: 500\nworkers: 2\ndelimiter: ';'").unwrap();
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.auto_row_cap, 500);
        assert_eq!(config.workers, 2);
        assert_eq!(config.delimiter_byte(), b';');
        assert_eq!(config.default_group_cap, DEFAULT_GROUP_CAP);
        assert_eq!(config.sample_seed, DEFAULT_SAMPLE_SEED);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_rowz: 5").unwrap();
        assert!(PipelineConfig::load(file.path()).is_err());
    }

    #[test]
    fn zero_workers_fail_validation() {
        let config = PipelineConfig {
            workers: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
