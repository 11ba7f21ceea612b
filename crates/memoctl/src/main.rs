//! MemoCache CLI - runs memoized recurrences and reports cache behaviour

mod error;
mod report;
mod scenario;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::scenario::Scenario;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Times to run the computation (every run after the first is a cache hit)
    #[arg(short, long, default_value_t = 2)]
    repeat: usize,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Include the stored cache keys in the report
    #[arg(long)]
    show_keys: bool,

    #[command(subcommand)]
    scenario: Scenario,
}

fn main() -> Result<()> {
    // Initialize tracing (stderr, so JSON output stays clean)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    info!("Starting memoctl v{}", env!("CARGO_PKG_VERSION"));
    info!(scenario = args.scenario.name(), repeat = args.repeat, "Running scenario");

    let mut report = args
        .scenario
        .run(args.repeat)
        .with_context(|| format!("scenario '{}' failed", args.scenario.name()))?;

    info!(
        entries = report.entries,
        hits = report.stats.hits,
        misses = report.stats.misses,
        "Scenario finished"
    );

    if !args.show_keys {
        report.keys.clear();
    }

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report);
    }

    Ok(())
}
