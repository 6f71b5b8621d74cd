//! Rebuild command implementation.

use crate::core::config::Config;
use crate::core::runtime::{load_registry, open_index};
use crate::core::time::Timestamp;
use crate::index::rebuild::RebuildReport;
use crate::jobs::{self, MemoryQueue};
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;

/// Rebuild the index once.
#[derive(Args, Debug)]
pub struct RebuildArgs {
    /// Delete the interim overlay only if it is at or before this Unix
    /// timestamp (seconds). Defaults to the rebuild start time.
    #[arg(long)]
    pub purge_timestamp: Option<f64>,

    /// Output format (text, json).
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Debug, Serialize)]
struct RebuildSummary {
    index: String,
    keys: usize,
    conflicting_keys: usize,
    added: usize,
    deleted: usize,
    modified: usize,
    touched_groups: Vec<String>,
    lock_wait_ms: u64,
    critical_section_ms: u64,
}

impl RebuildSummary {
    fn new(index: &str, report: &RebuildReport) -> Self {
        Self {
            index: index.to_string(),
            keys: report.snapshot.len(),
            conflicting_keys: report.snapshot.conflict_count(),
            added: report.diff.keys.add.len(),
            deleted: report.diff.keys.del.len(),
            modified: report.diff.keys.modified.len(),
            touched_groups: report.diff.values.iter().map(|g| g.to_string()).collect(),
            lock_wait_ms: report.lock_wait.as_millis() as u64,
            critical_section_ms: report.critical_section.as_millis() as u64,
        }
    }
}

/// Run the rebuild command.
pub fn run_rebuild(config: &Config, args: RebuildArgs) -> Result<()> {
    let queue = Arc::new(MemoryQueue::new());
    let registry = load_registry(config, true)?;
    let index = open_index(config, registry, queue.clone())?;

    let purge = args.purge_timestamp.map(Timestamp::from_secs_f64);
    let report = index
        .rebuild_with_report(purge)
        .context("rebuild failed")?;

    // Tasks queued by this rebuild; anything they enqueue is left for the
    // maintenance process.
    for task in queue.drain() {
        jobs::execute(&index, task).context("follow-up task failed")?;
    }

    let summary = RebuildSummary::new(index.name(), &report);
    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => print_text(&summary),
    }
    Ok(())
}

fn print_text(summary: &RebuildSummary) {
    println!("Rebuilt index '{}'", summary.index);
    println!("  Keys:           {}", summary.keys);
    println!("  Conflicting:    {}", summary.conflicting_keys);
    println!(
        "  Changes:        +{} -{} ~{}",
        summary.added, summary.deleted, summary.modified
    );
    if !summary.touched_groups.is_empty() {
        println!("  Groups touched: {}", summary.touched_groups.join(", "));
    }
    println!("  Lock wait:      {}ms", summary.lock_wait_ms);
    println!("  Lock held:      {}ms", summary.critical_section_ms);
}
