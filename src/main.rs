//! Kolosal Churn - Main Entry Point

use clap::Parser;
use kolosal_churn::cli::{cmd_evaluate, cmd_info, cmd_models, cmd_run, cmd_runs, cmd_sample, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kolosal_churn=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, normalize, report_dir, summary } => {
            cmd_run(&config, normalize, report_dir, summary)?;
        }
        Commands::Sample { lakehouse, table, rows, positive_rate, seed } => {
            cmd_sample(&lakehouse, &table, rows, positive_rate, seed)?;
        }
        Commands::Runs { tracking_dir, experiment } => {
            cmd_runs(&tracking_dir, &experiment)?;
        }
        Commands::Models { tracking_dir } => {
            cmd_models(&tracking_dir)?;
        }
        Commands::Evaluate { uri, config, normalize } => {
            cmd_evaluate(&uri, &config, normalize)?;
        }
        Commands::Info { lakehouse, table } => {
            cmd_info(&lakehouse, &table)?;
        }
    }

    Ok(())
}
