use anyhow::{Context, Result};
use clap::Parser;
use phenostat::cli::Cli;
use phenostat::config::StatsConfig;
use phenostat::orchestrator::PhenotypeAnalysisOrchestrator;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber; `--debug` raises the level to TRACE
fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::TRACE
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let mut config = StatsConfig::from_toml(&args.config)
        .with_context(|| format!("Failed to load config: {}", args.config.display()))?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }

    let report = PhenotypeAnalysisOrchestrator::new(config).run(&args.only)?;
    for outcome in &report.outcomes {
        eprintln!("{}", outcome);
    }

    if report.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}
