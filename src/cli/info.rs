//! `info` command: header metadata, table sizes, load diagnostics.
//!
//! Loads the snapshot only — no inbound index or retained computation, so
//! it stays fast on huge dumps.

use super::CliProgress;
use crate::cancel::CancelToken;
use crate::heap::Snapshot;
use anyhow::{Context, Result};
use console::style;
use std::path::Path;

pub(super) fn run(file: &Path) -> Result<()> {
    let progress = CliProgress::new();
    let snapshot = Snapshot::load(file, &progress, &CancelToken::new())
        .with_context(|| format!("failed to load snapshot {}", file.display()))?;

    println!("{}", style(format!("Snapshot {}", file.display())).bold());
    println!("  container version: {}", snapshot.version());

    if !snapshot.header().entries.is_empty() {
        println!("{}", style("Header").bold());
        for (key, value) in &snapshot.header().entries {
            println!("  {key}: {}", value.display());
        }
    }

    println!("{}", style("Tables").bold());
    println!("  objects: {}", snapshot.object_count());
    println!("  types: {}", snapshot.type_count());
    println!("  threads: {}", snapshot.threads().len());
    println!("  total heap size: {} bytes", snapshot.total_heap_size());

    let d = snapshot.diagnostics();
    println!("{}", style("Diagnostics").bold());
    println!("  dangling references: {}", d.dangling_references);
    println!("  duplicate addresses: {}", d.duplicate_addresses);
    println!("  missing types: {}", d.missing_types);
    println!("  unknown sections: {}", d.unknown_sections);
    println!("  conflicting shapes: {}", d.conflicting_shapes);

    Ok(())
}
