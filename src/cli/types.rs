//! `types` command: types ranked by summed retained heap of instances.

use super::{load_analysis, truncate_cell, Cli};
use crate::projection::HeapView;
use anyhow::Result;
use console::style;
use std::path::Path;

pub(super) fn run(cli: &Cli, file: &Path, top: usize, format: &str) -> Result<()> {
    let analysis = load_analysis(file, cli)?;
    let view = HeapView::new(&analysis.snapshot, &analysis.inbound, &analysis.retained);
    let rows = view.page_by_type(0, top, None);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let type_w = rows
        .iter()
        .map(|r| r.type_name.chars().count())
        .max()
        .unwrap_or(4)
        .clamp("Type".len(), 40);
    println!(
        "{} | {} | {}",
        style(format!("{:<type_w$}", "Type")).bold(),
        style(format!("{:>9}", "Instances")).bold(),
        style(format!("{:>18}", "Retained heap size")).bold(),
    );
    println!("{}", "-".repeat(type_w + 33));
    for row in rows {
        println!(
            "{:<type_w$} | {:>9} | {:>18}",
            truncate_cell(&row.type_name, type_w),
            row.instance_count,
            row.retained_total,
        );
    }
    Ok(())
}
