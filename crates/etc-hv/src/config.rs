use std::path::PathBuf;

use clap::Parser;
use consensus::ForkSchedule;
use serde::Deserialize;
use thiserror::Error;
use verification::VerifierConfig;

// ============================================================================
// CLI STRUCTS
// ============================================================================

/// ETC-HV: replay a header file through the asynchronous header verifier.
#[derive(Parser, Debug, Default)]
#[command(name = "etc-hv", version = "0.1.0")]
pub struct Cli {
    /// Path to TOML configuration file.
    #[arg(short = 'C', long)]
    pub config: Option<PathBuf>,

    /// JSON file holding an array of block headers.
    #[arg(long = "headers")]
    pub headers: Option<PathBuf>,

    /// Headers per verification batch.
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,

    /// Number of leading headers trusted without verification.
    #[arg(long = "anchor")]
    pub anchor: Option<usize>,

    /// Ancestors each header is checked against.
    #[arg(long = "depth")]
    pub depth: Option<u64>,

    /// Most headers the verified-header cache holds; unbounded if unset.
    #[arg(long = "cache-capacity")]
    pub cache_capacity: Option<usize>,

    /// Seconds a batch may wait for ancestors before timing out.
    #[arg(long = "batch-ttl-secs")]
    pub batch_ttl_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

// ============================================================================
// CONFIG FILE STRUCTS
// ============================================================================

/// Configuration loaded from TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub headers: Option<String>,
    pub batch_size: Option<usize>,
    pub anchor: Option<usize>,
    pub depth: Option<u64>,
    pub cache_capacity: Option<usize>,
    pub log_level: Option<String>,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub forks: ForkSchedule,
}

// ============================================================================
// RUNTIME CONFIG
// ============================================================================

/// Final merged configuration for runtime.
#[derive(Debug)]
pub struct RuntimeConfig {
    pub headers: PathBuf,
    pub batch_size: usize,
    pub anchor: usize,
    pub depth: u64,
    pub cache_capacity: Option<usize>,
    pub log_level: String,
    pub verifier: VerifierConfig,
    pub forks: ForkSchedule,
}

impl RuntimeConfig {
    /// Merge CLI args with config file. Precedence: CLI > config file > defaults.
    pub fn from_cli_and_file(cli: &Cli, file: ConfigFile) -> Result<Self, ConfigError> {
        let headers = cli
            .headers
            .clone()
            .or_else(|| file.headers.map(PathBuf::from))
            .ok_or(ConfigError::MissingRequired("headers"))?;

        let batch_size = cli.batch_size.or(file.batch_size).unwrap_or(64);
        if batch_size == 0 {
            return Err(ConfigError::Invalid("batch-size must be at least 1"));
        }

        let anchor = cli.anchor.or(file.anchor).unwrap_or(1);
        if anchor == 0 {
            return Err(ConfigError::Invalid("anchor must be at least 1"));
        }

        let depth = cli.depth.or(file.depth).unwrap_or(1);
        if (anchor as u64) < depth {
            return Err(ConfigError::Invalid("anchor must be at least depth"));
        }

        let cache_capacity = cli.cache_capacity.or(file.cache_capacity);
        if cache_capacity.is_some_and(|c| (c as u64) < depth.max(1)) {
            return Err(ConfigError::Invalid("cache-capacity must cover depth"));
        }

        let mut verifier = file.verifier;
        if let Some(ttl) = cli.batch_ttl_secs {
            verifier.batch_ttl_secs = ttl;
        }

        let log_level = cli
            .log_level
            .clone()
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        Ok(RuntimeConfig {
            headers,
            batch_size,
            anchor,
            depth,
            cache_capacity,
            log_level,
            verifier,
            forks: file.forks,
        })
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("--{0} is required (via CLI or config file)")]
    MissingRequired(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

// ============================================================================
// LOADING FUNCTIONS
// ============================================================================

/// Load TOML config file, returns default if path is None.
pub fn load_config_file(path: Option<&PathBuf>) -> Result<ConfigFile, ConfigError> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)?;
            toml::from_str(&content).map_err(ConfigError::Toml)
        }
        None => Ok(ConfigFile::default()),
    }
}
