//! `retained-heap` command: the objects keeping the most memory alive.

use super::{load_analysis, terminal_width, truncate_cell, Cli};
use crate::projection::{HeapView, ObjectRow};
use anyhow::Result;
use console::style;
use std::path::Path;

pub(super) fn run(cli: &Cli, file: &Path, top: usize, format: &str) -> Result<()> {
    let analysis = load_analysis(file, cli)?;
    let view = HeapView::new(&analysis.snapshot, &analysis.inbound, &analysis.retained);
    let rows = view.page_by_retained(0, top);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => render_table(&rows),
    }
    Ok(())
}

fn render_table(rows: &[ObjectRow]) {
    let addr_w = rows
        .iter()
        .map(|r| r.address.to_string().len())
        .max()
        .unwrap_or(7)
        .max("Address".len());
    let type_w = rows
        .iter()
        .map(|r| r.type_name.chars().count())
        .max()
        .unwrap_or(11)
        .clamp("Object type".len(), 32);
    let retained_w = "Retained heap size".len();

    // The string column takes whatever terminal width is left.
    let used = addr_w + type_w + retained_w + 9; // separators
    let str_w = terminal_width().saturating_sub(used).max(16);

    println!(
        "{} | {} | {} | {}",
        style(format!("{:>addr_w$}", "Address")).bold(),
        style(format!("{:<type_w$}", "Object type")).bold(),
        style(format!("{:>retained_w$}", "Retained heap size")).bold(),
        style("String representation").bold(),
    );
    println!("{}", "-".repeat(used + str_w.min(24)));

    for row in rows {
        println!(
            "{:>addr_w$} | {:<type_w$} | {:>retained_w$} | {}",
            row.address,
            truncate_cell(&row.type_name, type_w),
            row.retained_size,
            truncate_cell(row.str_repr.as_deref().unwrap_or(""), str_w),
        );
    }
}
