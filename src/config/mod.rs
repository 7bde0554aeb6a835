//! Configuration management for the rebalancer.
//!
//! Loads settings from an optional config file and environment variables.

use crate::solver::DEFAULT_MAX_NODES;
use crate::strategy::Cadence;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Rebalance cadence and selection constraints
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    /// Solver budget and parallelism
    #[serde(default)]
    pub solver: SolverConfig,
    /// Output file locations
    #[serde(default)]
    pub output: OutputConfig,
    /// Ordered asset universe for exposure matrices (empty = derive from sheets)
    #[serde(default)]
    pub universe: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// How often to re-optimize
    #[serde(default)]
    pub cadence: Cadence,
    /// Maximum |longs − shorts| allowed within a sector
    #[serde(default = "default_sector_exposure_bound")]
    pub sector_exposure_bound: u32,
    /// Score value meaning "no score available"
    #[serde(default = "default_sentinel_score")]
    pub sentinel_score: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Branch-and-bound node budget for programs without sector block
    /// structure; exceeding it counts as infeasible
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u64,
    /// Wall-clock limit per pre-solved selection in seconds (0 = none)
    #[serde(default)]
    pub timeout_secs: u64,
    /// Concurrent selections during the parallel pre-solve (1 = sequential)
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving all output files
    #[serde(default = "default_output_directory")]
    pub directory: String,
    #[serde(default = "default_long_exposure_file")]
    pub long_exposure_file: String,
    #[serde(default = "default_short_exposure_file")]
    pub short_exposure_file: String,
    #[serde(default = "default_rebalance_dates_file")]
    pub rebalance_dates_file: String,
    #[serde(default = "default_portfolios_file")]
    pub portfolios_file: String,
}

// Default value functions
fn default_sector_exposure_bound() -> u32 {
    50
}

fn default_sentinel_score() -> Decimal {
    Decimal::new(-999, 0)
}

fn default_max_nodes() -> u64 {
    DEFAULT_MAX_NODES
}

fn default_parallelism() -> usize {
    1
}

fn default_output_directory() -> String {
    "output".to_string()
}

fn default_long_exposure_file() -> String {
    "long_exposure.csv".to_string()
}

fn default_short_exposure_file() -> String {
    "short_exposure.csv".to_string()
}

fn default_rebalance_dates_file() -> String {
    "rebalance_dates.csv".to_string()
}

fn default_portfolios_file() -> String {
    "portfolios.json".to_string()
}

impl Config {
    /// Load configuration from `.env`, an optional config file and `LSR_*`
    /// environment variables (`LSR_REBALANCE__CADENCE=monthly`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("LSR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if !config.rebalance.cadence.is_recognized() {
            warn!(
                cadence = %config.rebalance.cadence,
                "Unrecognized cadence, every day will attempt a rebalance"
            );
        }

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.solver.max_nodes > 0, "solver.max_nodes must be positive");
        anyhow::ensure!(
            self.solver.parallelism >= 1,
            "solver.parallelism must be at least 1"
        );
        anyhow::ensure!(
            !self.output.directory.trim().is_empty(),
            "output.directory must not be empty"
        );
        for (key, name) in [
            ("output.long_exposure_file", &self.output.long_exposure_file),
            ("output.short_exposure_file", &self.output.short_exposure_file),
            ("output.rebalance_dates_file", &self.output.rebalance_dates_file),
            ("output.portfolios_file", &self.output.portfolios_file),
        ] {
            anyhow::ensure!(!name.trim().is_empty(), "{} must not be empty", key);
        }

        Ok(())
    }
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            cadence: Cadence::default(),
            sector_exposure_bound: default_sector_exposure_bound(),
            sentinel_score: default_sentinel_score(),
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_nodes: default_max_nodes(),
            timeout_secs: 0,
            parallelism: default_parallelism(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            long_exposure_file: default_long_exposure_file(),
            short_exposure_file: default_short_exposure_file(),
            rebalance_dates_file: default_rebalance_dates_file(),
            portfolios_file: default_portfolios_file(),
        }
    }
}
