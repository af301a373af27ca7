// nowcast_cli/src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use nowcast_cli::{cli::Cli, config::load_config, io};
use nowcast_core::backtest::BacktestRunner;
use nowcast_core::epiweek::Epiweek;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let start = Epiweek::from_code(cli.start).context("invalid start epiweek")?;
    let end = Epiweek::from_code(cli.end).context("invalid end epiweek")?;
    let config = load_config(cli.config.as_deref())?;
    let table = io::load_table(&cli.sensors, &cli.truth)?;

    let report = BacktestRunner::new(&config, &table)
        .run(start, end)
        .with_context(|| format!("backtest {start}..={end} failed"))?;

    for season in &report.seasons {
        if let Some(state) = season.final_state {
            info!(
                "{} {}: {} weeks ({} observed), final ({:.4}, {:.4})",
                season.region, season.season, season.weeks, season.observed_weeks, state.mean, state.variance
            );
        }
    }

    let (records, gaps) = io::write_report(&cli.output_label, &report)?;
    info!(
        "Wrote {} records to {} and {} gaps to {}",
        report.records.len(),
        records.display(),
        report.gaps.len(),
        gaps.display()
    );
    Ok(())
}
