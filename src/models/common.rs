use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::errors::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtherscanConfig {
    #[serde(default = "default_etherscan_url")]
    pub base_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    pub api_key: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiConfig {
    pub path: Option<PathBuf>,
    pub address: Option<String>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    pub etherscan: Option<EtherscanConfig>,
}

impl Default for AbiConfig {
    fn default() -> Self {
        Self {
            path: None,
            address: None,
            cache_dir: default_cache_dir(),
            etherscan: None,
        }
    }
}

// How the ingest stage holds the input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    Bulk,
    #[default]
    Streaming,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    #[default]
    Date,
    Unix,
}

impl TimestampFormat {
    pub fn column_name(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Unix => "timestamp",
        }
    }
}

// What to do when a classified record fails to decode against its event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    #[default]
    Abort,
    SkipRow,
    SkipEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub contract_name: String,
    pub input_dir: Option<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub mode: IngestMode,
    pub chunk_size: Option<usize>,
    #[serde(default = "default_partitions")]
    pub num_partitions: usize,
    pub workers: Option<usize>,
    #[serde(default)]
    pub timestamp_format: TimestampFormat,
    #[serde(default)]
    pub decode_failure: DecodeFailurePolicy,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub abi: AbiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn new(contract_name: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            contract_name: contract_name.into(),
            input_dir: None,
            output_dir: output_dir.into(),
            mode: IngestMode::default(),
            chunk_size: None,
            num_partitions: default_partitions(),
            workers: None,
            timestamp_format: TimestampFormat::default(),
            decode_failure: DecodeFailurePolicy::default(),
            overwrite: false,
            events: Vec::new(),
            abi: AbiConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.contract_name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "contract_name".to_string(),
            });
        }
        if self.chunk_size == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.num_partitions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "num_partitions".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.workers == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "workers".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_partitions() -> usize {
    1
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("abis")
}

fn default_etherscan_url() -> String {
    "https://api.etherscan.io/v2/api".to_string()
}

fn default_chain_id() -> u64 {
    1
}

fn default_max_attempts() -> u32 {
    1
}

fn default_metrics_address() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_port() -> u16 {
    9100
}

// Counters for everything a run reads, drops and writes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub files_read: u64,
    pub lines_read: u64,
    pub malformed_lines: u64,
    pub malformed_records: u64,
    pub records: u64,
    pub events: BTreeMap<String, u64>,
    pub unknown_records: u64,
    pub filtered_records: u64,
    pub decoded_rows: BTreeMap<String, u64>,
    pub decode_failures: u64,
    pub join_misses: u64,
    pub chunks: u64,
}

impl RunStats {
    pub fn total_decoded(&self) -> u64 {
        self.decoded_rows.values().sum()
    }

    pub fn merge(&mut self, other: RunStats) {
        self.files_read += other.files_read;
        self.lines_read += other.lines_read;
        self.malformed_lines += other.malformed_lines;
        self.malformed_records += other.malformed_records;
        self.records += other.records;
        for (event, count) in other.events {
            *self.events.entry(event).or_default() += count;
        }
        self.unknown_records += other.unknown_records;
        self.filtered_records += other.filtered_records;
        for (event, count) in other.decoded_rows {
            *self.decoded_rows.entry(event).or_default() += count;
        }
        self.decode_failures += other.decode_failures;
        self.join_misses += other.join_misses;
        self.chunks += other.chunks;
    }

    pub fn log_summary(&self, stage: &str) {
        info!(
            "{} finished: files={} lines={} records={} malformed_lines={} malformed_records={} chunks={}",
            stage,
            self.files_read,
            self.lines_read,
            self.records,
            self.malformed_lines,
            self.malformed_records,
            self.chunks
        );
        if !self.events.is_empty() {
            info!("Event counts:");
            for (event, count) in &self.events {
                info!("  {:<32} {}", event, count);
            }
        }
        if !self.decoded_rows.is_empty() {
            info!("Rows written per event:");
            for (event, count) in &self.decoded_rows {
                info!("  {:<32} {}", event, count);
            }
        }
        if self.unknown_records > 0
            || self.decode_failures > 0
            || self.join_misses > 0
            || self.filtered_records > 0
        {
            info!(
                "Dropped: unknown={} filtered={} decode_failures={} join_misses={}",
                self.unknown_records, self.filtered_records, self.decode_failures, self.join_misses
            );
        }
    }
}
