mod cli;
mod client;
mod config;
mod cycle;
mod model;
mod observation;
mod recommend;
mod retry;
mod schedule;
mod storage;
#[cfg(test)]
mod testing;

use std::{io, process};

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let cli = cli::Cli::parse();
    init_tracing(cli.json);

    if let Err(e) = cli::run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
