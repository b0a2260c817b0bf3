mod classify;
mod cli;
mod codegen;
mod config;
mod diagnostics;
mod heal;
mod ir;
mod journey;
mod learning;
mod matcher;
mod model;
mod pipeline;
mod runner;
mod storage;
mod validate;

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

/// Environment variable holding the log filter, e.g. `waymark=debug`.
const LOG_ENV: &str = "WAYMARK_LOG";

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run(&cli) {
        let report = serde_json::json!({
            "error": e.kind(),
            "message": e.to_string(),
            "retryable": e.retryable(),
        });
        eprintln!("{report}");
        process::exit(e.exit_code());
    }
}
