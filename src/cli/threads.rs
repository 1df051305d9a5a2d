//! `threads` command: per-thread retained heap with stacks and locals.

use super::{load_analysis, truncate_cell, Cli};
use crate::projection::HeapView;
use anyhow::Result;
use console::style;
use std::path::Path;

pub(super) fn run(cli: &Cli, file: &Path, format: &str) -> Result<()> {
    let analysis = load_analysis(file, cli)?;
    let view = HeapView::new(&analysis.snapshot, &analysis.inbound, &analysis.retained);
    let threads = view.thread_view();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&threads)?);
        return Ok(());
    }

    for thread in &threads {
        let flags = match (thread.is_alive, thread.is_daemon) {
            (true, true) => "alive, daemon",
            (true, false) => "alive",
            (false, true) => "dead, daemon",
            (false, false) => "dead",
        };
        println!(
            "{} ({flags}) — retained heap {} bytes",
            style(&thread.name).bold(),
            thread.retained_size,
        );
        for frame in &thread.frames {
            println!("  {}:{} in {}", frame.filename, frame.line, frame.function);
            for local in &frame.locals {
                println!(
                    "      {:<24} @{:<14} retained {}",
                    truncate_cell(&local.name, 24),
                    local.address,
                    local.retained_size,
                );
            }
        }
        println!();
    }
    Ok(())
}
