//! Command-line interface.
//!
//! Unified CLI for message index operations.

pub mod commands;

use crate::core::config::{Config, ConfigOverrides, DEFAULT_CONFIG_PATH};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// msgindex - message key to message group index.
#[derive(Parser, Debug)]
#[command(name = "msgindex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Snapshot file path, overriding storage.path.
    #[arg(long, global = true)]
    pub storage_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the maintenance process.
    Start(commands::StartArgs),
    /// Rebuild the index once.
    Rebuild(commands::RebuildArgs),
    /// Resolve a message key to its groups.
    Lookup(commands::LookupArgs),
    /// Show the published snapshot.
    Inspect(commands::InspectArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}

impl Cli {
    /// Configuration file to read.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Overrides given on the command line.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            log_level: self.log_level.clone(),
            storage_path: self.storage_path.clone(),
        }
    }

    /// Load the configuration (defaults if the file is absent) with
    /// overrides applied.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load_or_default(&self.config_path())?;
        config.apply_overrides(&self.overrides());
        config.validate()?;
        Ok(config)
    }
}

/// Initialize the tracing subscriber if the telemetry feature is enabled.
/// `RUST_LOG` wins over `level`.
#[cfg(feature = "telemetry")]
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing(_level: &str) {}
