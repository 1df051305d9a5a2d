//! CLI command definitions and handlers.

mod info;
mod retained;
mod threads;
mod types;

use crate::cancel::CancelToken;
use crate::heap::{InboundIndex, Snapshot};
use crate::progress::ProgressSink;
use crate::retained::{
    provide_retained_heap_with_caching, RetainedHeap, RetainedOptions,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Heapscope — retained-heap analysis for interpreter heap snapshots.
///
/// Loads a captured snapshot, computes how many bytes each object keeps
/// alive, and reports the heaviest objects, types, and threads.
#[derive(Parser, Debug)]
#[command(name = "heapscope")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Skip reading an existing retained-heap cache (it is still rewritten)
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Directory for retained-heap cache files
    /// (default: next to the snapshot, or $HEAPSCOPE_CACHE_DIR)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the objects with the largest retained heap
    #[command(name = "retained-heap")]
    RetainedHeap {
        /// Path to the snapshot file
        #[arg(long)]
        file: PathBuf,

        /// Number of objects to show
        #[arg(long, default_value = "20")]
        top: usize,

        /// Output format: text, json
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Show threads with their retained heap and stacks
    Threads {
        /// Path to the snapshot file
        #[arg(long)]
        file: PathBuf,

        /// Output format: text, json
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Show types ranked by the retained heap of their instances
    Types {
        /// Path to the snapshot file
        #[arg(long)]
        file: PathBuf,

        /// Number of types to show
        #[arg(long, default_value = "20")]
        top: usize,

        /// Output format: text, json
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Show snapshot metadata, table sizes, and load diagnostics
    Info {
        /// Path to the snapshot file
        #[arg(long)]
        file: PathBuf,
    },
}

/// Run the CLI with parsed arguments.
pub fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::RetainedHeap { file, top, format } => {
            retained::run(&cli, file, *top, format)
        }
        Commands::Threads { file, format } => threads::run(&cli, file, format),
        Commands::Types { file, top, format } => types::run(&cli, file, *top, format),
        Commands::Info { file } => info::run(file),
    }
}

/// The three analysis artifacts every reporting command needs.
pub(crate) struct Analysis {
    pub snapshot: Snapshot,
    pub inbound: InboundIndex,
    pub retained: RetainedHeap,
}

pub(crate) fn load_analysis(file: &Path, cli: &Cli) -> Result<Analysis> {
    let cancel = CancelToken::new();
    let progress = CliProgress::new();

    let snapshot = Snapshot::load(file, &progress, &cancel)
        .with_context(|| format!("failed to load snapshot {}", file.display()))?;
    let inbound = InboundIndex::build(&snapshot);

    let cache_dir = cli
        .cache_dir
        .clone()
        .or_else(|| std::env::var_os("HEAPSCOPE_CACHE_DIR").map(PathBuf::from));
    let options = RetainedOptions {
        use_cache: !cli.no_cache,
        cache_dir,
        ..RetainedOptions::default()
    };
    let retained = provide_retained_heap_with_caching(
        file, &snapshot, &inbound, &options, &progress, &cancel,
    )?;

    Ok(Analysis { snapshot, inbound, retained })
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.green} {msg}")
        .expect("valid template")
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("valid template")
        .progress_chars("█▓▒░  ")
}

/// Indicatif-backed progress sink: a spinner for open-ended phases, a bar
/// when the total is known.
pub(crate) struct CliProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        Self { bar: Mutex::new(None) }
    }
}

impl ProgressSink for CliProgress {
    fn begin(&self, phase: &str, total: Option<u64>) {
        let bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(bar_style());
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(spinner_style());
                bar.enable_steady_tick(Duration::from_millis(100));
                bar
            }
        };
        bar.set_message(phase.to_string());
        if let Some(previous) = self.bar.lock().unwrap().replace(bar) {
            previous.finish_and_clear();
        }
    }

    fn advance(&self, done: u64) {
        if let Some(bar) = self.bar.lock().unwrap().as_ref() {
            bar.set_position(done);
        }
    }

    fn finish(&self) {
        if let Some(bar) = self.bar.lock().unwrap().take() {
            bar.finish_and_clear();
        }
    }
}

/// Char-safe truncation for table cells.
pub(crate) fn truncate_cell(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Terminal width, with a floor so narrow panes still get usable tables.
pub(crate) fn terminal_width() -> usize {
    let (_, cols) = console::Term::stdout().size();
    (cols as usize).max(80)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_cell() {
        assert_eq!(truncate_cell("short", 10), "short");
        assert_eq!(truncate_cell("exactly-10", 10), "exactly-10");
        assert_eq!(truncate_cell("a longer string", 8), "a longe…");
        assert_eq!(truncate_cell("héllo wörld", 6), "héllo…");
    }
}
