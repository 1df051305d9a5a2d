use clap::Parser;
use heapscope::cli::{self, Cli};
use heapscope::HeapError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level; logs go to stderr so tables stay
    // pipeable.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(err) = cli::run(cli) {
        eprintln!("error: {err:#}");
        let code = err
            .downcast_ref::<HeapError>()
            .map_or(1, HeapError::exit_code);
        std::process::exit(code);
    }
}
