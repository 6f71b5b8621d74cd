//! Inspect command implementation.

use crate::core::config::Config;
use crate::core::runtime::{load_registry, open_index};
use crate::jobs::MemoryQueue;
use anyhow::Result;
use clap::Args;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Show the published snapshot.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Output format (text, json).
    #[arg(long, default_value = "text")]
    pub format: String,

    /// Only list keys claimed by more than one group.
    #[arg(long)]
    pub conflicts: bool,
}

/// Run the inspect command.
pub fn run_inspect(config: &Config, args: InspectArgs) -> Result<()> {
    let registry = load_registry(config, false)?;
    let index = open_index(config, registry, Arc::new(MemoryQueue::new()))?;
    let snapshot = index.snapshot(true)?;

    let entries: BTreeMap<String, Vec<String>> = snapshot
        .iter()
        .filter(|(_, ids)| !args.conflicts || ids.is_conflict())
        .map(|(key, ids)| {
            (
                key.to_string(),
                ids.as_slice().iter().map(|id| id.to_string()).collect(),
            )
        })
        .collect();

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            println!("Index '{}'", index.name());
            println!("  Storage:     {}", config.storage.backend);
            println!("  Keys:        {}", snapshot.len());
            println!("  Conflicting: {}", snapshot.conflict_count());
            println!();
            for (key, ids) in &entries {
                println!("{}\t{}", key, ids.join(", "));
            }
        }
    }
    Ok(())
}
