//! Start command implementation.

use crate::core::config::Config;
use crate::core::runtime::Runtime;
use anyhow::Result;
use clap::Args;

/// Run the maintenance process.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Skip the start-up rebuild.
    #[arg(long)]
    pub no_initial_rebuild: bool,
}

/// Run the start command until Ctrl-C.
pub async fn run_start(mut config: Config, args: StartArgs) -> Result<()> {
    if args.no_initial_rebuild {
        config.maintenance.rebuild_on_start = false;
    }
    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
