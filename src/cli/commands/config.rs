//! Config command implementation.

use crate::cli::Cli;
use crate::core::config::Config;
use crate::core::runtime::check_group_definitions;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration file and the group definitions it names.
    Validate,
    /// Print the effective configuration with defaults and overrides.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Run the config command.
pub fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<()> {
    match &args.command {
        ConfigCommand::Validate => validate_config(cli),
        ConfigCommand::Show { format } => show_config(cli, format),
    }
}

fn validate_config(cli: &Cli) -> Result<()> {
    let path = cli.config_path();
    let mut config = Config::from_file(&path)?;
    config.apply_overrides(&cli.overrides());
    config.validate()?;
    println!("✓ {} is valid", path.display());

    let definitions = &config.groups.definitions;
    let groups = check_group_definitions(definitions)
        .with_context(|| format!("group definitions {} are invalid", definitions.display()))?;
    println!("✓ {} defines {} groups", definitions.display(), groups);

    if config.storage.backend == "memory" {
        println!("  ⚠ Warning: memory storage does not survive restarts");
    }
    if config.lock.backend == "memory" {
        println!("  ⚠ Warning: memory lock does not exclude other processes");
    }
    Ok(())
}

fn show_config(cli: &Cli, format: &str) -> Result<()> {
    let config = cli.load_config()?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        _ => println!("{}", config.to_toml()?),
    }
    Ok(())
}
