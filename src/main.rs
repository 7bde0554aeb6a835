//! Long/Short Rebalancer - Main Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use long_short_rebalancer::backtest::{
    load_universe, write_outputs, RebalanceEngine, ReplayRunner, ScoreBook,
};
use long_short_rebalancer::config::Config;
use long_short_rebalancer::solver::{BlockSolver, BranchAndBoundSolver};
use long_short_rebalancer::strategy::{Cadence, SectorNeutralSelector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Long/Short Rebalancer CLI
#[derive(Parser)]
#[command(name = "long-short-rebalancer")]
#[command(version, about = "Sector-neutral long/short portfolio rebalancing on score sheets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the score sheets and write exposure matrices
    Run {
        /// Path to the long score sheet CSV
        #[arg(short, long)]
        long: String,

        /// Path to the short score sheet CSV
        #[arg(short, long)]
        short: String,

        /// Ordered universe file (one asset per line)
        #[arg(short, long)]
        universe: Option<String>,

        /// Config file (default: ./config.{toml,yaml,json} if present)
        #[arg(short, long)]
        config: Option<String>,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,

        /// Rebalance cadence (d, s, q, m, t, a or daily, weekly, ...)
        #[arg(long)]
        cadence: Option<String>,

        /// Maximum |longs - shorts| within any sector
        #[arg(short, long)]
        bound: Option<u32>,

        /// Number of selections solved concurrently
        #[arg(short, long)]
        parallelism: Option<usize>,
    },

    /// Summarize the score sheets without solving
    Inspect {
        /// Path to the long score sheet CSV
        #[arg(short, long)]
        long: String,

        /// Path to the short score sheet CSV
        #[arg(short, long)]
        short: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Commands::Run {
            long,
            short,
            universe,
            config,
            output,
            cadence,
            bound,
            parallelism,
        } => {
            let overrides = Overrides {
                output,
                cadence,
                bound,
                parallelism,
            };
            run_replay(&long, &short, universe.as_deref(), config.as_deref(), overrides).await
        }
        Commands::Inspect { long, short } => inspect(&long, &short),
    }
}

/// CLI flags that override loaded configuration.
struct Overrides {
    output: Option<String>,
    cadence: Option<String>,
    bound: Option<u32>,
    parallelism: Option<usize>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(output) = self.output {
            config.output.directory = output;
        }
        if let Some(cadence) = self.cadence {
            let cadence = Cadence::from(cadence);
            if !cadence.is_recognized() {
                warn!(%cadence, "Unrecognized cadence, every day will attempt a rebalance");
            }
            config.rebalance.cadence = cadence;
        }
        if let Some(bound) = self.bound {
            config.rebalance.sector_exposure_bound = bound;
        }
        if let Some(parallelism) = self.parallelism {
            config.solver.parallelism = parallelism;
        }
    }
}

/// Load the sheets, replay every day and write the outputs.
async fn run_replay(
    long_path: &str,
    short_path: &str,
    universe_path: Option<&str>,
    config_path: Option<&str>,
    overrides: Overrides,
) -> Result<()> {
    let mut config = Config::load(config_path)?;
    overrides.apply(&mut config);
    config.validate()?;

    log_config(&config);

    info!("📊 Loading score sheets: {} / {}", long_path, short_path);
    let book = ScoreBook::load(long_path, short_path)?;
    info!(
        "   {} days, {} long assets, {} short assets",
        book.days.len(),
        book.long.len(),
        book.short.len()
    );

    let universe = match universe_path {
        Some(path) => load_universe(path)?,
        None if !config.universe.is_empty() => config.universe.clone(),
        None => book.default_universe(),
    };
    info!("   Universe: {} assets", universe.len());

    let solver = Arc::new(BlockSolver::new(BranchAndBoundSolver::new(
        config.solver.max_nodes,
    )));
    let selector = SectorNeutralSelector::new(solver);
    let engine = RebalanceEngine::new(
        book.long.clone(),
        book.short.clone(),
        config.rebalance.clone(),
        selector,
    );

    let mut runner = ReplayRunner::new(engine, config.solver.parallelism);
    if config.solver.timeout_secs > 0 {
        runner = runner.with_timeout(Duration::from_secs(config.solver.timeout_secs));
    }

    let result = runner.run(&book.days).await?;
    let matrix = result.exposure_matrix(&universe);

    println!("\n{}", result.summary());

    let written = write_outputs(&result, &matrix, &config.output)?;
    info!("📁 Long exposure saved to: {}", written.long_exposure.display());
    info!("📁 Short exposure saved to: {}", written.short_exposure.display());
    info!("📁 Rebalance dates saved to: {}", written.rebalance_dates.display());
    info!("📁 Portfolios saved to: {}", written.portfolios.display());

    Ok(())
}

/// Print what the sheets contain without solving anything.
fn inspect(long_path: &str, short_path: &str) -> Result<()> {
    let book = ScoreBook::load(long_path, short_path)
        .with_context(|| format!("Failed to load {} / {}", long_path, short_path))?;

    println!("Days: {}", book.days.len());
    if let (Some(first), Some(last)) = (book.days.first(), book.days.last()) {
        println!("Range: {} to {}", first.label, last.label);
    }
    println!("Long assets: {}", book.long.len());
    println!("Short assets: {}", book.short.len());
    println!("Universe (derived): {}", book.default_universe().len());
    println!("Sectors: {}", book.sectors().join(", "));

    let misaligned = book.misaligned_days();
    println!("Misaligned period keys: {}", misaligned.len());
    for day in misaligned {
        println!(
            "  {} long={} short={}",
            day.label,
            day.period_key,
            day.misaligned_period.as_deref().unwrap_or("")
        );
    }

    let malformed: Vec<_> = book
        .days
        .iter()
        .filter_map(|day| day.target_count().err().map(|e| (day, e)))
        .collect();
    println!("Malformed counts: {}", malformed.len());
    for (day, err) in malformed {
        println!("  {} ({})", day.label, err);
    }

    Ok(())
}

/// Initialize logging to stdout and a daily-rolling file under `logs/`.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "rebalancer.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("long_short_rebalancer=info".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Cadence: {}", config.rebalance.cadence);
    info!(
        "   Sector Exposure Bound: {}",
        config.rebalance.sector_exposure_bound
    );
    info!("   Sentinel Score: {}", config.rebalance.sentinel_score);
    info!("   Solver Node Limit: {}", config.solver.max_nodes);
    if config.solver.timeout_secs > 0 {
        info!("   Solver Timeout: {}s", config.solver.timeout_secs);
    }
    info!("   Parallelism: {}", config.solver.parallelism);
    info!("   Output Directory: {}", config.output.directory);
}
