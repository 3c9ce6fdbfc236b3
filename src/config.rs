use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

/// Fallback used when `worker_timeout` cannot be parsed.
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

static DURATION_TERM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]*\.?[0-9]+)(ns|us|µs|μs|ms|s|m|h)").expect("hardcoded regex pattern is valid")
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    pub worker_pool: WorkerPoolConfig,
    pub analysis_params: AnalysisParameters,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerPoolConfig {
    pub analysis_queue_size: usize,
    #[serde(default = "default_worker_count")]
    pub max_concurrent_analysis: usize,
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout: String,
}

impl WorkerPoolConfig {
    /// Per-task deadline. Unparseable values fall back to [`DEFAULT_WORKER_TIMEOUT`].
    pub fn worker_timeout(&self) -> Duration {
        match parse_duration(&self.worker_timeout) {
            Ok(timeout) => timeout,
            Err(err) => {
                warn!("invalid worker timeout: {err}, using default of 5m");
                DEFAULT_WORKER_TIMEOUT
            }
        }
    }
}

/// Analysis options shared read-only by every worker.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AnalysisParameters {
    /// Pattern group name to keyword list. Ordered by group name.
    #[serde(default)]
    pub content_patterns: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout: String,
    #[serde(default = "default_true")]
    pub metadata_extraction: bool,
    #[serde(default = "default_metadata_tool")]
    pub metadata_tool: String,
}

impl Default for AnalysisParameters {
    fn default() -> Self {
        Self {
            content_patterns: BTreeMap::new(),
            scan_timeout: default_scan_timeout(),
            metadata_extraction: true,
            metadata_tool: default_metadata_tool(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };
    parse_config(&bytes)
}

pub fn parse_config(bytes: &[u8]) -> Result<LoadedConfig, ConfigError> {
    let config: Config = serde_yaml::from_slice(bytes)?;
    let config_hash = hash_bytes(bytes);
    Ok(LoadedConfig { config, config_hash })
}

/// Parse a duration such as `300ms`, `30s`, `5m`, `1h30m` or `1.5h`.
///
/// The grammar is a subset of Go's `time.ParseDuration`: no leading sign and
/// no trailing-dot numbers such as `5.s`.
///
/// Accepted units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `0`
/// is accepted; any other unit-less or signed value is rejected.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let trimmed = input.trim();
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    let invalid = || ConfigError::InvalidDuration(input.to_string());

    let mut pos = 0usize;
    let mut total_secs = 0f64;
    for caps in DURATION_TERM.captures_iter(trimmed) {
        let (Some(whole), Some(value), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            return Err(invalid());
        };
        if whole.start() != pos {
            return Err(invalid());
        }
        pos = whole.end();

        let value: f64 = value.as_str().parse().map_err(|_| invalid())?;
        let unit_secs = match unit.as_str() {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        total_secs += value * unit_secs;
    }

    if pos == 0 || pos != trimmed.len() {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(total_secs).map_err(|_| invalid())
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_worker_timeout() -> String {
    "5m".to_string()
}

fn default_scan_timeout() -> String {
    "30s".to_string()
}

fn default_metadata_tool() -> String {
    "exiftool".to_string()
}

fn default_true() -> bool {
    true
}
