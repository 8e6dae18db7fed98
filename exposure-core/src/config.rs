//! Configuration file support for Exposure
//!
//! Loads engine and output settings from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.exposurerc.json` in the working directory
//! 3. `exposure.config.json` in the working directory
//!
//! All fields are optional. CLI flags take precedence over config file values.

use crate::engine::{
    EngineConfig, DEFAULT_CHUNK_SIZE, DEFAULT_HISTOGRAM_BINS, DEFAULT_MAX_SIMULATIONS,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Trial count used when the caller does not ask for one
pub const DEFAULT_SIMULATIONS: u64 = 10_000;

/// Default run database location, relative to the working directory
pub const DEFAULT_DATABASE: &str = ".exposure/runs.db";

/// Ceiling for `max_simulations` itself
const MAX_SIMULATIONS_LIMIT: u64 = 10_000_000;

const MAX_HISTOGRAM_BINS: usize = 10_000;

/// Exposure configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExposureConfig {
    /// Upper bound on trials per run (default: 50000)
    #[serde(default)]
    pub max_simulations: Option<u64>,

    /// Trials per run when not given on the command line (default: 10000)
    #[serde(default)]
    pub default_simulations: Option<u64>,

    /// Histogram bin count per result (default: 50)
    #[serde(default)]
    pub histogram_bins: Option<usize>,

    /// Trials per parallel chunk (default: 1024)
    #[serde(default)]
    pub chunk_size: Option<usize>,

    /// Fixed master seed; derived from the clock when absent
    #[serde(default)]
    pub seed: Option<u64>,

    /// Abort a run that takes longer than this many seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Maximum number of failure modes shown on the dashboard
    #[serde(default)]
    pub top_n: Option<usize>,

    /// Run database path (default: .exposure/runs.db)
    #[serde(default)]
    pub database: Option<PathBuf>,
}

/// Resolved configuration with every default filled in
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub max_simulations: u64,
    pub default_simulations: u64,
    pub histogram_bins: usize,
    pub chunk_size: usize,
    pub seed: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub top_n: Option<usize>,
    pub database: PathBuf,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

impl ExposureConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        let max = self.max_simulations.unwrap_or(DEFAULT_MAX_SIMULATIONS);
        if max == 0 {
            anyhow::bail!("max_simulations must be positive (got 0)");
        }
        if max > MAX_SIMULATIONS_LIMIT {
            anyhow::bail!(
                "max_simulations must be at most {} (got {})",
                MAX_SIMULATIONS_LIMIT,
                max
            );
        }

        if let Some(n) = self.default_simulations {
            if n == 0 {
                anyhow::bail!("default_simulations must be positive (got 0)");
            }
            if n > max {
                anyhow::bail!(
                    "default_simulations ({}) must not exceed max_simulations ({})",
                    n,
                    max
                );
            }
        }

        if let Some(bins) = self.histogram_bins {
            if bins == 0 || bins > MAX_HISTOGRAM_BINS {
                anyhow::bail!(
                    "histogram_bins must be between 1 and {} (got {})",
                    MAX_HISTOGRAM_BINS,
                    bins
                );
            }
        }

        if let Some(chunk) = self.chunk_size {
            if chunk == 0 {
                anyhow::bail!("chunk_size must be positive (got 0)");
            }
        }

        if self.timeout_secs == Some(0) {
            anyhow::bail!("timeout_secs must be positive (got 0)");
        }

        if self.top_n == Some(0) {
            anyhow::bail!("top_n must be positive (got 0)");
        }

        if let Some(ref db) = self.database {
            if db.as_os_str().is_empty() {
                anyhow::bail!("database path must not be empty");
            }
        }

        Ok(())
    }

    /// Resolve config into a form ready for use
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let max_simulations = self.max_simulations.unwrap_or(DEFAULT_MAX_SIMULATIONS);
        Ok(ResolvedConfig {
            max_simulations,
            default_simulations: self
                .default_simulations
                .unwrap_or(DEFAULT_SIMULATIONS.min(max_simulations)),
            histogram_bins: self.histogram_bins.unwrap_or(DEFAULT_HISTOGRAM_BINS),
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            seed: self.seed,
            timeout_secs: self.timeout_secs,
            top_n: self.top_n,
            database: self
                .database
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE)),
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        ExposureConfig::default().resolve()
    }

    /// Engine settings derived from this config
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_simulations: self.max_simulations,
            histogram_bins: self.histogram_bins,
            chunk_size: self.chunk_size,
            seed: self.seed,
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Discover and load a config file from a directory
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(root: &Path) -> Result<Option<(ExposureConfig, PathBuf)>> {
    for name in [".exposurerc.json", "exposure.config.json"] {
        let path = root.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<ExposureConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: ExposureConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config in `root`.
/// Returns default config if nothing is found.
pub fn load_and_resolve(root: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(root)? {
            Some((config, path)) => (config, Some(path)),
            None => (ExposureConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}
