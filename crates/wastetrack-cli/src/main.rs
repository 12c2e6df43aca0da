//! wastetrack - simulated waste-collection telemetry pipeline
//!
//! Generates truck readings, moves them through a queue into raw storage,
//! enriches them with the nearest postcode and compacts the Parquet output.

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::Cli;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = commands::execute(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
