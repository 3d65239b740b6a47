use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;

fn main() {
    let args = cli::Args::parse();

    // RUST_LOG wins; -v raises the default level
    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = cli::run(args) {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}
