//! tdctl (td) - CLI for Inspektor Gadget trace jobs
//!
//! Starts and stops the seccomp and biolatency traces, manages the seccomp
//! policies they generate, and dumps traceloop logs.

use anyhow::Result;
use clap::Parser;

mod commands;
mod config;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    // Run the command
    if let Err(e) = cli.run().await {
        // Print error in a user-friendly way
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
