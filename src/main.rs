//! msgindex - unified CLI entrypoint.
//!
//! Usage:
//!   msgindex start --config config/msgindex.toml
//!   msgindex rebuild [--purge-timestamp SECS]
//!   msgindex lookup <namespace> <key> [--primary]
//!   msgindex inspect [--format text|json]
//!   msgindex config validate|show

use anyhow::Result;
use clap::Parser;
use message_index::cli::commands::{
    run_config, run_inspect, run_lookup, run_rebuild, run_start,
};
use message_index::cli::{init_tracing, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config(args) = &cli.command {
        init_tracing(cli.log_level.as_deref().unwrap_or("warn"));
        return run_config(&cli, args);
    }

    let config = cli.load_config()?;
    init_tracing(&config.telemetry.log_level);

    match cli.command {
        Commands::Start(args) => run_start(config, args).await,
        Commands::Rebuild(args) => run_rebuild(&config, args),
        Commands::Lookup(args) => run_lookup(&config, args),
        Commands::Inspect(args) => run_inspect(&config, args),
        Commands::Config(_) => Ok(()),
    }
}
