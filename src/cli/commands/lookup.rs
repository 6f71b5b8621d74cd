//! Lookup command implementation.

use crate::core::config::Config;
use crate::core::runtime::{load_registry, open_index};
use crate::jobs::MemoryQueue;
use anyhow::Result;
use clap::Args;
use std::sync::Arc;

/// Resolve a message key to its groups.
#[derive(Args, Debug)]
pub struct LookupArgs {
    /// Namespace id.
    #[arg(allow_negative_numbers = true)]
    pub namespace: i32,

    /// Message key, as written in the group.
    pub key: String,

    /// Print only the primary (first claiming) group.
    #[arg(long)]
    pub primary: bool,
}

/// Run the lookup command.
pub fn run_lookup(config: &Config, args: LookupArgs) -> Result<()> {
    let registry = load_registry(config, false)?;
    let index = open_index(config, registry, Arc::new(MemoryQueue::new()))?;

    if args.primary {
        match index.primary_group_id(args.namespace, &args.key) {
            Some(id) => println!("{}", id),
            None => println!("(none)"),
        }
        return Ok(());
    }

    let ids = index.lookup_group_ids(args.namespace, &args.key);
    if ids.is_empty() {
        println!("(none)");
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}
