//! Output files for a finished replay.

use crate::backtest::engine::RunResult;
use crate::config::OutputConfig;
use crate::strategy::{ExposureMatrix, Side};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Paths of the files written by [`write_outputs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenOutputs {
    pub long_exposure: PathBuf,
    pub short_exposure: PathBuf,
    pub rebalance_dates: PathBuf,
    pub portfolios: PathBuf,
}

/// Write exposure matrices, rebalance dates and per-day portfolios.
pub fn write_outputs(
    result: &RunResult,
    matrix: &ExposureMatrix,
    output: &OutputConfig,
) -> Result<WrittenOutputs> {
    let dir = Path::new(&output.directory);
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let written = WrittenOutputs {
        long_exposure: dir.join(&output.long_exposure_file),
        short_exposure: dir.join(&output.short_exposure_file),
        rebalance_dates: dir.join(&output.rebalance_dates_file),
        portfolios: dir.join(&output.portfolios_file),
    };

    write_file(&written.long_exposure, &matrix.to_csv(Side::Long))?;
    write_file(&written.short_exposure, &matrix.to_csv(Side::Short))?;
    rebalance_dates_to_csv(result.rebalance_days(), &written.rebalance_dates)?;

    let json = serde_json::to_string_pretty(&result.outcomes)
        .context("Failed to serialize portfolios")?;
    write_file(&written.portfolios, &json)?;

    info!(
        directory = %dir.display(),
        days = matrix.len(),
        rebalances = result.rebalance_days().len(),
        "Outputs written"
    );

    Ok(written)
}

/// Write the successful rebalance days, one per line.
pub fn rebalance_dates_to_csv(days: &[String], path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writeln!(file, "rebalance_date")?;
    for day in days {
        writeln!(file, "{}", day)?;
    }

    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
